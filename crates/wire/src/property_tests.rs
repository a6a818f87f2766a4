// SPDX-License-Identifier: MIT

//! Property tests: anything we serialize must parse back unchanged.

use proptest::prelude::*;
use tokio::io::AsyncWriteExt;

use crate::{quoted, ImapInterval, ImapSet, ImapStream};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    #[test]
    fn quoted_string_round_trips(s in "[ -~]{0,64}") {
        runtime().block_on(async {
            let wire = format!("{}\r\n", quoted(&s));
            let (client, server) = tokio::io::duplex(4096);
            let mut client = client;
            client.write_all(wire.as_bytes()).await.unwrap();
            let mut stream = ImapStream::new(server);
            let parsed = stream.read_string().await.unwrap();
            prop_assert_eq!(parsed, s.into_bytes());
            Ok(())
        })?;
    }

    #[test]
    fn literal_round_trips(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
        runtime().block_on(async {
            let mut wire = format!("{{{}}}\r\n", data.len()).into_bytes();
            wire.extend_from_slice(&data);
            wire.extend_from_slice(b"\r\n");
            let (client, server) = tokio::io::duplex(8192);
            let mut client = client;
            client.write_all(&wire).await.unwrap();
            let mut stream = ImapStream::new(server);
            let parsed = stream.read_string().await.unwrap();
            prop_assert_eq!(parsed, data);
            Ok(())
        })?;
    }

    #[test]
    fn imap_set_display_parse_round_trips(
        intervals in proptest::collection::vec((1i64..10_000, 0i64..100, any::<bool>()), 1..8)
    ) {
        let mut set = ImapSet::new();
        for (begin, span, open) in intervals {
            if open {
                set.add(ImapInterval::open(begin));
            } else {
                set.add(ImapInterval::closed(begin, begin + span));
            }
        }
        let reparsed = ImapSet::parse(&set.to_string()).unwrap();
        prop_assert_eq!(reparsed, set);
    }
}

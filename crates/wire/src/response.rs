// SPDX-License-Identifier: MIT

//! Command results and their serialized form.

/// Result code of a tagged or BYE response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    No,
    Bad,
    Bye,
}

impl ResultCode {
    fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Ok => "OK",
            ResultCode::No => "NO",
            ResultCode::Bad => "BAD",
            ResultCode::Bye => "BYE",
        }
    }
}

/// One response line sent to the client.
///
/// Exactly one tagged response is emitted per command; untagged responses
/// carry data lines, continuations announce readiness for literal bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Tagged { tag: String, code: ResultCode, text: String },
    Untagged { text: String },
    /// Untagged `* BYE` sent before the server closes the connection.
    Bye { text: String },
    Continuation { text: String },
}

impl Response {
    pub fn ok(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Response::Tagged { tag: tag.into(), code: ResultCode::Ok, text: text.into() }
    }

    pub fn no(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Response::Tagged { tag: tag.into(), code: ResultCode::No, text: text.into() }
    }

    pub fn bad(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Response::Tagged { tag: tag.into(), code: ResultCode::Bad, text: text.into() }
    }

    pub fn untagged(text: impl Into<String>) -> Self {
        Response::Untagged { text: text.into() }
    }

    pub fn bye(text: impl Into<String>) -> Self {
        Response::Bye { text: text.into() }
    }

    pub fn continuation(text: impl Into<String>) -> Self {
        Response::Continuation { text: text.into() }
    }

    /// The wire form of this response, CR LF included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let line = match self {
            Response::Tagged { tag, code, text } => {
                format!("{} {} {}", tag, code.as_str(), text)
            }
            Response::Untagged { text } => format!("* {text}"),
            Response::Bye { text } => format!("* BYE {text}"),
            Response::Continuation { text } => format!("+ {text}"),
        };
        let mut out = line.into_bytes();
        out.extend_from_slice(b"\r\n");
        out
    }
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;

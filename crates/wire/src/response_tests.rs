// SPDX-License-Identifier: MIT

use super::*;
use yare::parameterized;

#[parameterized(
    ok = { Response::ok("2", "Completed"), "2 OK Completed\r\n" },
    no = { Response::no("3", "No such item"), "3 NO No such item\r\n" },
    bad = { Response::bad("4", "Unknown command"), "4 BAD Unknown command\r\n" },
    untagged = { Response::untagged("5 FETCH (UID 5)"), "* 5 FETCH (UID 5)\r\n" },
    bye = { Response::bye("server shutting down"), "* BYE server shutting down\r\n" },
    continuation = { Response::continuation("Ready for literal data"), "+ Ready for literal data\r\n" },
)]
fn serialized_form(response: Response, expected: &str) {
    assert_eq!(response.to_bytes(), expected.as_bytes());
}

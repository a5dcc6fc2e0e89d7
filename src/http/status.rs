//! Status code registry.
//!
//! # Responsibilities
//! - Hold the static `(code, reason)` table for the 100-599 code space
//! - Resolve a numeric code to its reason phrase
//! - Provide a generic fallback phrase for codes outside the table
//!
//! # Design Decisions
//! - The table includes unofficial codes used by common servers and CDNs
//!   (nginx, IIS, Cloudflare, AWS ELB, Shopify, ...), not just the IANA set
//! - Lookup is a binary search, so the table MUST stay sorted ascending by
//!   code with no duplicates; a const assertion enforces this at build time
//! - Reasons are `&'static str` owned by the table and handed out borrowed

use std::fmt;

use thiserror::Error;

/// One row of the status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEntry {
    pub code: u16,
    pub reason: &'static str,
}

const fn entry(code: u16, reason: &'static str) -> StatusEntry {
    StatusEntry { code, reason }
}

/// Lookup failure: the code is not registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown status code {0}")]
pub struct UnknownStatusCode(pub u16);

/// Every known status code, ascending by code.
pub const STATUS_TABLE: &[StatusEntry] = &[
    // 1xx
    entry(100, "Continue"),
    entry(101, "Switching Protocols"),
    entry(102, "Processing"),
    entry(103, "Early Hints"),
    // 2xx
    entry(200, "OK"),
    entry(201, "Created"),
    entry(202, "Accepted"),
    entry(203, "Non-Authoritative Information"),
    entry(204, "No Content"),
    entry(205, "Reset Content"),
    entry(206, "Partial Content"),
    entry(207, "Multi-Status"),
    entry(208, "Already Reported"),
    entry(218, "This Is Fine"),
    entry(226, "IM Used"),
    // 3xx
    entry(300, "Multiple Choices"),
    entry(301, "Moved Permanently"),
    entry(302, "Found"),
    entry(303, "See Other"),
    entry(304, "Not Modified"),
    entry(305, "Use Proxy"),
    entry(306, "Switch Proxy"),
    entry(307, "Temporary Redirect"),
    entry(308, "Permanent Redirect"),
    // 4xx
    entry(400, "Bad Request"),
    entry(401, "Unauthorized"),
    entry(402, "Payment Required"),
    entry(403, "Forbidden"),
    entry(404, "Not Found"),
    entry(405, "Method Not Allowed"),
    entry(406, "Not Acceptable"),
    entry(407, "Proxy Authentication Required"),
    entry(408, "Request Timeout"),
    entry(409, "Conflict"),
    entry(410, "Gone"),
    entry(411, "Length Required"),
    entry(412, "Precondition Failed"),
    entry(413, "Payload Too Large"),
    entry(414, "URI Too Long"),
    entry(415, "Unsupported Media Type"),
    entry(416, "Range Not Satisfiable"),
    entry(417, "Expectation Failed"),
    entry(418, "I'm a teapot"),
    entry(419, "Page Expired"),
    entry(420, "Enhance Your Calm"),
    entry(421, "Misdirected Request"),
    entry(422, "Unprocessable Entity"),
    entry(423, "Locked"),
    entry(424, "Failed Dependency"),
    entry(425, "Too Early"),
    entry(426, "Upgrade Required"),
    entry(428, "Precondition Required"),
    entry(429, "Too Many Requests"),
    entry(430, "Request Header Fields Too Large"),
    entry(431, "Request Header Fields Too Large"),
    entry(440, "Login Time-out"),
    entry(444, "No Response"),
    entry(449, "Retry With"),
    entry(450, "Blocked by Windows Parental Controls"),
    entry(451, "Unavailable For Legal Reasons"),
    entry(460, "Client Closed Connection Prematurely"),
    entry(463, "Too Many Forwarded IP Addresses"),
    entry(464, "Incompatible Protocol"),
    entry(494, "Request Header Too Large"),
    entry(495, "SSL Certificate Error"),
    entry(496, "SSL Certificate Required"),
    entry(497, "HTTP Request Sent to HTTPS Port"),
    entry(498, "Invalid Token"),
    entry(499, "Client Closed Request"),
    // 5xx
    entry(500, "Internal Server Error"),
    entry(501, "Not Implemented"),
    entry(502, "Bad Gateway"),
    entry(503, "Service Unavailable"),
    entry(504, "Gateway Timeout"),
    entry(505, "HTTP Version Not Supported"),
    entry(506, "Variant Also Negotiates"),
    entry(507, "Insufficient Storage"),
    entry(508, "Loop Detected"),
    entry(509, "Bandwidth Limit Exceeded"),
    entry(510, "Not Extended"),
    entry(511, "Network Authentication Required"),
    entry(520, "Web Server Returned an Unknown Error"),
    entry(521, "Web Server Is Down"),
    entry(522, "Connection Timed Out"),
    entry(523, "Origin Is Unreachable"),
    entry(524, "A Timeout Occurred"),
    entry(525, "SSL Handshake Failed"),
    entry(526, "Invalid SSL Certificate"),
    entry(527, "Railgun Error"),
    entry(529, "Site Is Overloaded"),
    entry(530, "Site Is Frozen"),
    entry(561, "Unauthorized"),
    entry(598, "Network Read Timeout Error"),
    entry(599, "Network Connect Timeout Error"),
];

const fn is_strictly_ascending(table: &[StatusEntry]) -> bool {
    let mut i = 1;
    while i < table.len() {
        if table[i - 1].code >= table[i].code {
            return false;
        }
        i += 1;
    }
    true
}

const _: () = assert!(
    is_strictly_ascending(STATUS_TABLE),
    "STATUS_TABLE must be sorted ascending by code without duplicates"
);

/// Resolve the reason phrase for `code`.
///
/// Only exact matches succeed; a code missing from the table is reported as
/// [`UnknownStatusCode`] rather than resolving to a neighbouring entry.
pub fn lookup(code: u16) -> Result<&'static str, UnknownStatusCode> {
    STATUS_TABLE
        .binary_search_by_key(&code, |entry| entry.code)
        .map(|index| STATUS_TABLE[index].reason)
        .map_err(|_| UnknownStatusCode(code))
}

/// Reason phrase for `code`, falling back to a phrase naming its class.
pub fn reason_or_generic(code: u16) -> &'static str {
    lookup(code).unwrap_or_else(|_| generic_reason(code))
}

fn generic_reason(code: u16) -> &'static str {
    match code / 100 {
        1 => "Informational",
        2 => "Success",
        3 => "Redirection",
        4 => "Client Error",
        5 => "Server Error",
        _ => "Unknown Status",
    }
}

/// A numeric HTTP status code.
///
/// Any value in `100..=999` can be carried; registration in the table only
/// matters for the reason phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const URI_TOO_LONG: StatusCode = StatusCode(414);
    pub const REQUEST_HEADER_FIELDS_TOO_LARGE: StatusCode = StatusCode(431);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const HTTP_VERSION_NOT_SUPPORTED: StatusCode = StatusCode(505);

    /// Wrap a raw code. Returns `None` outside `100..=999`.
    pub fn from_u16(code: u16) -> Option<Self> {
        (100..=999).contains(&code).then_some(Self(code))
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Reason phrase from the table, or the generic class phrase.
    pub fn reason(&self) -> &'static str {
        reason_or_generic(self.0)
    }

    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.0)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.0)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.0)
    }

    /// Whether a response with this status may carry a body.
    pub fn allows_body(&self) -> bool {
        !(self.is_informational() || self.0 == 204 || self.0 == 304)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason())
    }
}

//! SOCKS5 protocol constants (RFC 1928, RFC 1929)

/// SOCKS protocol versions
pub const SOCKS_V4: u8 = 0x04;
pub const SOCKS_V5: u8 = 0x05;

/// Username/password sub-negotiation version
pub const AUTH_VERSION: u8 = 0x01;

/// Authentication methods
pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_GSSAPI: u8 = 0x01;
pub const METHOD_USER_PASS: u8 = 0x02;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

/// Username/password status
pub const AUTH_SUCCEEDED: u8 = 0x00;
pub const AUTH_FAILED: u8 = 0xFF;

/// Commands
pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

/// Address types
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// Reply codes
pub const REP_SUCCEEDED: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_NOT_ALLOWED: u8 = 0x02;
pub const REP_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_CONNECTION_REFUSED: u8 = 0x05;
pub const REP_TTL_EXPIRED: u8 = 0x06;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;
pub const REP_UNASSIGNED: u8 = 0xFF;

/// Human-readable name of a reply code
pub fn reply_name(reply: u8) -> &'static str {
    match reply {
        REP_SUCCEEDED => "SUCCEEDED",
        REP_GENERAL_FAILURE => "GENERAL_SOCKS_SERVER_FAILURE",
        REP_NOT_ALLOWED => "CONNECTION_NOT_ALLOWED_BY_RULESET",
        REP_NETWORK_UNREACHABLE => "NETWORK_UNREACHABLE",
        REP_HOST_UNREACHABLE => "HOST_UNREACHABLE",
        REP_CONNECTION_REFUSED => "CONNECTION_REFUSED",
        REP_TTL_EXPIRED => "TTL_EXPIRED",
        REP_COMMAND_NOT_SUPPORTED => "COMMAND_NOT_SUPPORTED",
        REP_ADDRESS_TYPE_NOT_SUPPORTED => "ADDRESS_TYPE_NOT_SUPPORTED",
        _ => "UNASSIGNED",
    }
}

/// Human-readable name of an auth status
pub fn auth_status_name(status: u8) -> &'static str {
    match status {
        AUTH_SUCCEEDED => "SUCCEEDED",
        _ => "UNASSIGNED",
    }
}

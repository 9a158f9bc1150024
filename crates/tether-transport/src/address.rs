//! Server address normalization.
//!
//! Players type addresses the way the server lobby shows them
//! (`archipelago.gg:38281`, sometimes just a host name). The socket layer
//! needs a full `ws://host:port` URL, so every transport runs the address
//! through [`normalize_address`] before connecting.

use crate::TransportError;

/// Port the coordination server listens on when the address names none.
pub const DEFAULT_PORT: u16 = 38281;

/// Turns a user-supplied server address into a WebSocket URL.
///
/// - no scheme → `ws://` is assumed
/// - no port → [`DEFAULT_PORT`]
/// - only `ws` and `wss` are accepted
///
/// ```rust
/// use tether_transport::normalize_address;
///
/// assert_eq!(normalize_address("localhost").unwrap(), "ws://localhost:38281");
/// assert_eq!(normalize_address("wss://example.org:443").unwrap(), "wss://example.org:443");
/// ```
///
/// # Errors
/// Returns [`TransportError::InvalidAddress`] for empty input, an
/// unsupported scheme, a missing host or a port that isn't a `u16`.
pub fn normalize_address(address: &str) -> Result<String, TransportError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(invalid(address, "address is empty"));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(invalid(address, "address contains whitespace"));
    }

    let (scheme, rest) = match trimmed.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => ("ws".to_string(), trimmed),
    };
    if scheme != "ws" && scheme != "wss" {
        return Err(invalid(
            address,
            &format!("unsupported scheme {scheme:?}"),
        ));
    }

    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    let (host, port) = split_host_port(address, authority)?;

    Ok(format!(
        "{scheme}://{host}:{port}{path}",
        port = port.unwrap_or(DEFAULT_PORT)
    ))
}

/// Splits `host[:port]`, keeping bracketed IPv6 hosts intact.
fn split_host_port<'a>(
    address: &str,
    authority: &'a str,
) -> Result<(&'a str, Option<u16>), TransportError> {
    let (host, port) = if authority.starts_with('[') {
        let end = authority
            .find(']')
            .ok_or_else(|| invalid(address, "unterminated IPv6 host"))?;
        let (host, rest) = authority.split_at(end + 1);
        match rest {
            "" => (host, None),
            _ => match rest.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => return Err(invalid(address, "garbage after IPv6 host")),
            },
        }
    } else {
        match authority.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() || host == "[]" {
        return Err(invalid(address, "missing host"));
    }

    let port = match port {
        Some(p) => Some(
            p.parse::<u16>()
                .map_err(|_| invalid(address, &format!("invalid port {p:?}")))?,
        ),
        None => None,
    };

    Ok((host, port))
}

fn invalid(address: &str, reason: &str) -> TransportError {
    TransportError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

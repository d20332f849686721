//! RESP protocol: encoding, streaming decoding and connection handshake

mod decoder;
mod encoder;

pub use decoder::Decoder;
pub use encoder::Encoder;

use crate::connection::Connection;
use crate::request::Request;
use redis_conduit_core::{
    config::{ConnectionConfig, ProtocolVersion},
    error::{RedisError, RedisResult},
    types::Endpoint,
    value::Response,
};
use tracing::{debug, info};

/// Bring a freshly opened connection into a usable session.
///
/// With negotiation enabled a `HELLO` is attempted first, carrying the
/// credentials and client name. A rejected `HELLO` (older servers, or
/// negotiation disabled) falls back to RESP2 with `AUTH` and
/// `CLIENT SETNAME`. Wrong credentials are reported as
/// [`RedisError::Auth`] in both paths. A non-zero database is selected
/// last when `select_db` is set.
///
/// # Errors
///
/// Returns the first failing step.
pub async fn handshake(
    conn: &Connection,
    endpoint: &Endpoint,
    config: &ConnectionConfig,
    select_db: bool,
) -> RedisResult<ProtocolVersion> {
    let username = endpoint.username.as_deref();
    let password = endpoint.password.as_deref();

    let mut negotiated = None;
    if config.protocol_negotiation {
        let version = config.protocol_version;
        let mut hello = Request::cmd("HELLO").arg(version.as_hello_arg());
        if let Some(password) = password {
            hello = hello.arg("AUTH").arg(username.unwrap_or("default")).arg(password);
        }
        if let Some(name) = &config.client_name {
            hello = hello.arg("SETNAME").arg(name.as_str());
        }

        match conn.send(&hello).await? {
            Response::Error(msg) if is_auth_failure(&msg) => {
                return Err(RedisError::Auth(msg));
            }
            Response::Error(msg) => {
                info!(
                    "HELLO rejected by {} ({}), falling back to RESP2",
                    endpoint, msg
                );
            }
            reply => {
                if let Some(proto) = reply.field("proto").and_then(|p| p.as_int().ok()) {
                    debug!("Negotiated protocol {} with {}", proto, endpoint);
                }
                conn.set_protocol(version);
                negotiated = Some(version);
            }
        }
    }

    let protocol = match negotiated {
        Some(version) => version,
        None => {
            if let Some(password) = password {
                let mut auth = Request::cmd("AUTH");
                if let Some(user) = username {
                    auth = auth.arg(user);
                }
                if let Response::Error(msg) = conn.send(&auth.arg(password)).await? {
                    return Err(RedisError::Auth(msg));
                }
            }
            if let Some(name) = &config.client_name {
                let setname = Request::cmd("CLIENT").arg("SETNAME").arg(name.as_str());
                conn.send(&setname).await?.into_result()?;
            }
            conn.set_protocol(ProtocolVersion::Resp2);
            ProtocolVersion::Resp2
        }
    };

    if select_db && config.database != 0 {
        conn.send(&Request::cmd("SELECT").arg(config.database))
            .await?
            .into_result()?;
    }

    Ok(protocol)
}

fn is_auth_failure(msg: &str) -> bool {
    msg.starts_with("WRONGPASS") || msg.starts_with("NOAUTH") || msg.starts_with("NOPERM")
}

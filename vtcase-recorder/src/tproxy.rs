//! The TPROXY listener: a socket bound with `IP_TRANSPARENT` so that, when
//! combined with an external `iptables -j TPROXY` rule, `accept()` hands
//! back connections whose `local_addr()` is the scanner's *original*
//! destination rather than this process's bind address. No `SO_ORIGINAL_DST`
//! lookup is needed (that's a `REDIRECT`-only concept); TPROXY semantics
//! already hand us the right address.
//!
//! Grounded on `manage_proxy` in
//! `original_source/vts-qa-recorder/vts-recording/recorder.py`.

use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use tokio::net::TcpListener;

#[derive(thiserror::Error, Debug)]
pub enum TproxyError {
    #[error("failed to create listening socket: {0}")]
    Create(#[source] std::io::Error),
    #[error("IP_TRANSPARENT is only supported on Linux")]
    UnsupportedPlatform,
    #[error("setsockopt(IP_TRANSPARENT) failed: {0}")]
    SetTransparent(#[source] std::io::Error),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to convert socket to a tokio listener: {0}")]
    IntoListener(#[source] std::io::Error),
}

/// Binds a TPROXY-ready listener on `addr`. `addr` is the proxy's own
/// listen address (commonly `0.0.0.0:<port>`), not the target's — the
/// original destination is recovered per-connection, not per-listener.
pub fn bind_transparent(addr: SocketAddr) -> Result<TcpListener, TproxyError> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, None).map_err(TproxyError::Create)?;
    socket.set_reuse_address(true).map_err(TproxyError::Create)?;
    set_ip_transparent(&socket)?;
    socket.set_nonblocking(true).map_err(TproxyError::Create)?;
    socket
        .bind(&addr.into())
        .map_err(|source| TproxyError::Bind { addr, source })?;
    socket.listen(1024).map_err(TproxyError::Create)?;
    TcpListener::from_std(socket.into()).map_err(TproxyError::IntoListener)
}

#[cfg(target_os = "linux")]
fn set_ip_transparent(socket: &Socket) -> Result<(), TproxyError> {
    let fd = socket.as_raw_fd();
    let enable: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_IP,
            libc::IP_TRANSPARENT,
            &enable as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(TproxyError::SetTransparent(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_ip_transparent(_socket: &Socket) -> Result<(), TproxyError> {
    Err(TproxyError::UnsupportedPlatform)
}

/// Recovers the scanner's original destination for an accepted connection.
/// Under TPROXY this is just the accepted socket's local address.
pub fn original_destination(stream: &tokio::net::TcpStream) -> std::io::Result<SocketAddr> {
    stream.local_addr()
}

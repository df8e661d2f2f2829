//! Free local port lookup.

use std::net::{Ipv4Addr, TcpListener};

use crate::{Error, Result};

/// Ask the kernel for a free port and release it again.
///
/// kubectl port-forward needs a concrete local port; handing it `0` does not
/// report back which port was picked.
pub fn reserve_ephemeral_port() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .map_err(|e| Error::PortReservation(e.to_string()))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::PortReservation(e.to_string()))?
        .port();
    drop(listener);
    Ok(port)
}

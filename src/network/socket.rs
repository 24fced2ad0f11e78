//! Socket tuning
//!
//! TCP_NODELAY di semua platform; ukuran buffer kernel via setsockopt
//! hanya di unix.

use std::io;

use mio::net::TcpStream;

use crate::config::SocketOptions;

/// Terapkan `SocketOptions` ke stream yang baru di-accept / di-connect
pub(crate) fn tune(stream: &TcpStream, options: &SocketOptions) -> io::Result<()> {
    stream.set_nodelay(options.nodelay)?;

    #[cfg(unix)]
    {
        if let Some(size) = options.send_buffer {
            set_buffer(stream, libc::SO_SNDBUF, size)?;
        }
        if let Some(size) = options.recv_buffer {
            set_buffer(stream, libc::SO_RCVBUF, size)?;
        }
    }

    Ok(())
}

/// True untuk error accept yang berarti proses / sistem kehabisan resource,
/// bukan kegagalan satu connection
pub(crate) fn is_resource_exhausted(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(
            err.raw_os_error(),
            Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
        )
    }
    #[cfg(not(unix))]
    {
        err.kind() == io::ErrorKind::OutOfMemory
    }
}

#[cfg(unix)]
fn set_buffer(stream: &TcpStream, option: libc::c_int, size: usize) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let optval = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
    // SAFETY: fd valid selama `stream` hidup, optval adalah c_int di stack
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            option,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

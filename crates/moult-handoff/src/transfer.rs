//! Descriptor transfer over a Unix stream socket.
//!
//! A live kernel socket handle is moved between processes as `SCM_RIGHTS`
//! ancillary data. The envelope carries a single marker byte of payload
//! and exactly one descriptor; receipt of the descriptor is the only
//! verification of a successful transfer.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use tokio::io::Interest;
use tokio::net::{TcpListener, UnixStream};

use crate::error::HandoffError;

#[cfg(target_os = "linux")]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(target_os = "linux"))]
const RECV_FLAGS: libc::c_int = 0;

/// Room for one `int`-sized control message. `CMSG_SPACE` is not const,
/// so the buffer is sized generously and the header fields are set at
/// runtime.
const CMSG_BUF_LEN: usize = 64;

/// Send a descriptor over `stream` as `SCM_RIGHTS` ancillary data.
///
/// The caller keeps its own descriptor; the receiving process ends up
/// with a new descriptor referring to the same open socket description.
pub async fn send_fd(stream: &UnixStream, fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    stream
        .async_io(Interest::WRITABLE, || sendmsg_fd(stream.as_raw_fd(), raw))
        .await
}

/// Receive a descriptor sent with [`send_fd`].
///
/// Returns `Ok(None)` if the peer closed the stream or sent data without
/// an `SCM_RIGHTS` control message, i.e. an empty envelope.
pub async fn recv_fd(stream: &UnixStream) -> io::Result<Option<OwnedFd>> {
    stream
        .async_io(Interest::READABLE, || recvmsg_fd(stream.as_raw_fd()))
        .await
}

/// Reconstruct a tokio [`TcpListener`] from a transferred descriptor.
///
/// The descriptor is rejected unless it is a socket in listening state;
/// anything else means the sender transferred the wrong handle and
/// adopting it would not make the port acceptable.
pub fn listener_from_fd(fd: OwnedFd) -> Result<TcpListener, HandoffError> {
    if !is_socket(fd.as_raw_fd()) || !is_listening(fd.as_raw_fd()) {
        return Err(HandoffError::NotAListener);
    }

    let std_listener = std::net::TcpListener::from(fd);
    std_listener
        .set_nonblocking(true)
        .map_err(HandoffError::Receive)?;
    TcpListener::from_std(std_listener).map_err(HandoffError::Receive)
}

fn sendmsg_fd(sock: RawFd, fd: RawFd) -> io::Result<()> {
    let mut marker = [1u8];
    let mut iov = libc::iovec {
        iov_base: marker.as_mut_ptr().cast(),
        iov_len: marker.len(),
    };
    let mut cmsg_buf = [0u8; CMSG_BUF_LEN];

    // SAFETY: msghdr points at stack buffers that outlive the call, and
    // the control buffer is large enough for one int-sized cmsg.
    unsafe {
        let mut msg: libc::msghdr = mem::zeroed();
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr().cast();
        msg.msg_controllen = libc::CMSG_SPACE(mem::size_of::<libc::c_int>() as libc::c_uint) as _;

        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<libc::c_int>() as libc::c_uint) as _;
        std::ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast::<libc::c_int>(), fd);

        if libc::sendmsg(sock, &msg, 0) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn recvmsg_fd(sock: RawFd) -> io::Result<Option<OwnedFd>> {
    let mut marker = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: marker.as_mut_ptr().cast(),
        iov_len: marker.len(),
    };
    let mut cmsg_buf = [0u8; CMSG_BUF_LEN];

    // SAFETY: as in sendmsg_fd; the received descriptor is immediately
    // wrapped in an OwnedFd so it cannot leak.
    unsafe {
        let mut msg: libc::msghdr = mem::zeroed();
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr().cast();
        msg.msg_controllen = cmsg_buf.len() as _;

        if libc::recvmsg(sock, &mut msg, RECV_FLAGS) < 0 {
            return Err(io::Error::last_os_error());
        }

        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        if cmsg.is_null()
            || (*cmsg).cmsg_level != libc::SOL_SOCKET
            || (*cmsg).cmsg_type != libc::SCM_RIGHTS
        {
            return Ok(None);
        }

        let fd = std::ptr::read_unaligned(libc::CMSG_DATA(cmsg).cast::<libc::c_int>());
        let fd = OwnedFd::from_raw_fd(fd);

        #[cfg(not(target_os = "linux"))]
        {
            let flags = libc::fcntl(fd.as_raw_fd(), libc::F_GETFD);
            if flags >= 0 {
                libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags | libc::FD_CLOEXEC);
            }
        }

        Ok(Some(fd))
    }
}

/// Validate that a file descriptor is a socket using fstat.
fn is_socket(fd: RawFd) -> bool {
    let mut stat: libc::stat = unsafe { mem::zeroed() };
    let result = unsafe { libc::fstat(fd, &mut stat) };
    if result != 0 {
        return false;
    }
    (stat.st_mode & libc::S_IFMT) == libc::S_IFSOCK
}

/// Validate that a socket is in listening state.
fn is_listening(fd: RawFd) -> bool {
    let mut accepting: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ACCEPTCONN,
            (&mut accepting as *mut libc::c_int).cast(),
            &mut len,
        )
    };
    result == 0 && accepting != 0
}

//! Request engine (§4.5): the single-reply and multi-reply (dump)
//! transaction patterns layered on top of the socket, builder and
//! parser.

use super::builder::MsgBuilder;
use super::parser::{HeaderOutcome, Message};
use super::socket::NetlinkSocket;
use crate::error::{Error, Result};

/// Sends `req` and waits for exactly one matching reply (§4.5
/// `Request`). `req` must not carry `NLM_F_DUMP`.
///
/// The returned [`Message`] is positioned at its very start (before
/// even the 16-byte header); callers are expected to run their own
/// `expect_header`/`expect_generic`/`take_attrs` sequence on it.
pub fn request(sock: &NetlinkSocket, req: MsgBuilder) -> Result<Message> {
    let seq = sock.send(req)?;

    loop {
        let datagram = sock.recv(0)?;
        let mut cursor = datagram.cursor();

        let msg = cursor.next_message()?.ok_or(Error::MissingReply)?;
        match msg.check_header(sock.pid(), seq)? {
            HeaderOutcome::Skip => continue,
            HeaderOutcome::Ack | HeaderOutcome::Message => {
                if cursor.next_message()?.is_some() {
                    return Err(Error::UnexpectedExtraMessage);
                }

                return Ok(msg);
            }
        }
    }
}

/// Sends `req` (with `NLM_F_DUMP|NLM_F_REQUEST` set) and invokes
/// `consumer` once per reply message until `NLMSG_DONE` is observed
/// (§4.5 `RequestMulti`). The first error from `consumer` aborts the
/// dump.
pub fn request_multi(
    sock: &NetlinkSocket,
    req: MsgBuilder,
    mut consumer: impl FnMut(Message) -> Result<()>,
) -> Result<()> {
    let seq = sock.send(req)?;

    loop {
        let datagram = sock.recv(0)?;
        let mut cursor = datagram.cursor();

        let mut msg = cursor.next_message()?.ok_or(Error::MissingReply)?;
        loop {
            match msg.check_header(sock.pid(), seq)? {
                HeaderOutcome::Skip => {}
                HeaderOutcome::Ack | HeaderOutcome::Message => {
                    if msg.header()?.nlmsg_type == super::bindings::NLMSG_DONE {
                        return Ok(());
                    }

                    consumer(msg)?;
                }
            }

            match cursor.next_message()? {
                Some(next) => msg = next,
                None => break,
            }
        }
    }
}

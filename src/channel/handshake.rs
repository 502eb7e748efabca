//! Link handshake (spec.md §4.2): magic/version exchange, capability
//! negotiation, and RSA ticket authentication, run once per channel
//! before it joins the common read/dispatch loop.

use tokio::io::AsyncWriteExt;

use crate::channel::fill_exact;
use crate::error::{Result, SpiceError};
use crate::transport::{ReadHalf, WriteHalf};
use crate::wire::caps::CapSet;
use crate::wire::link::{
    encrypt_ticket, LinkHeader, LinkMess, LinkReply, AUTH_MECHANISM_SPICE, LINK_HEADER_SIZE,
    LINK_MESS_SIZE,
};
use crate::wire::link_err;

use binrw::BinWrite;

/// Capabilities the server negotiated back, handed to the channel's
/// `setCaps()` hook (spec.md §4.2).
pub struct HandshakeCaps {
    pub common: CapSet,
    pub channel: CapSet,
}

/// Runs the full handshake on an already-connected socket: sends the
/// link packet, validates the link reply, authenticates with the SPICE
/// ticket mechanism, and reads the final link result (spec.md §4.2). On
/// any deviation the socket is left in an undefined state and an error is
/// returned; the caller tears the channel down.
pub async fn perform(
    read: &ReadHalf,
    write: &mut WriteHalf,
    connection_id: u32,
    channel_type: u8,
    channel_id: u8,
    password: &str,
    common_caps: &CapSet,
    channel_caps: &CapSet,
) -> Result<HandshakeCaps> {
    let link_packet = build_link_packet(connection_id, channel_type, channel_id, common_caps, channel_caps);
    write.write_all(&link_packet).await?;

    let mut header_buf = [0u8; LINK_HEADER_SIZE];
    fill_exact(read, &mut header_buf).await?;
    let mut cursor = std::io::Cursor::new(&header_buf[..]);
    let header = <LinkHeader as binrw::BinRead>::read(&mut cursor)
        .map_err(|e| SpiceError::Protocol(format!("bad link header: {e}")))?;
    header.validate()?;

    let mut body = vec![0u8; header.size as usize];
    fill_exact(read, &mut body).await?;
    let reply = LinkReply::parse(&body)?;
    if reply.fixed.error != link_err::OK {
        return Err(SpiceError::Protocol(format!(
            "link reply error: {}",
            link_err::name(reply.fixed.error)
        )));
    }

    let ticket = encrypt_ticket(password, &reply.fixed.pub_key)?;
    let mut auth_packet = Vec::with_capacity(4 + ticket.len());
    auth_packet.extend_from_slice(&AUTH_MECHANISM_SPICE.to_le_bytes());
    auth_packet.extend_from_slice(&ticket);
    write.write_all(&auth_packet).await?;

    let mut result_buf = [0u8; 4];
    fill_exact(read, &mut result_buf).await?;
    let result = u32::from_le_bytes(result_buf);
    if result != link_err::OK {
        return Err(SpiceError::AuthenticationFailed(
            link_err::name(result).to_string(),
        ));
    }

    Ok(HandshakeCaps {
        common: CapSet::from_words(reply.common_caps),
        channel: CapSet::from_words(reply.channel_caps),
    })
}

fn build_link_packet(
    connection_id: u32,
    channel_type: u8,
    channel_id: u8,
    common_caps: &CapSet,
    channel_caps: &CapSet,
) -> Vec<u8> {
    let mess = LinkMess {
        connection_id,
        channel_type,
        channel_id,
        num_common_caps: common_caps.len_words() as u32,
        num_channel_caps: channel_caps.len_words() as u32,
        caps_offset: LINK_MESS_SIZE,
    };
    let mut mess_bytes = std::io::Cursor::new(Vec::new());
    mess.write(&mut mess_bytes)
        .expect("fixed-size struct always serialises");
    let mess_bytes = mess_bytes.into_inner();

    let mut body = Vec::with_capacity(mess_bytes.len() + common_caps.words().len() * 4 + channel_caps.words().len() * 4);
    body.extend_from_slice(&mess_bytes);
    body.extend_from_slice(&common_caps.to_le_bytes());
    body.extend_from_slice(&channel_caps.to_le_bytes());

    let header = LinkHeader::new(body.len() as u32);
    let mut header_bytes = std::io::Cursor::new(Vec::new());
    header
        .write(&mut header_bytes)
        .expect("fixed-size struct always serialises");

    let mut packet = header_bytes.into_inner();
    packet.extend_from_slice(&body);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_packet_caps_offset_matches_mess_size() {
        let mut common = CapSet::new();
        common.set(crate::wire::caps::common::MINI_HEADER);
        let channel = CapSet::new();
        let packet = build_link_packet(0, crate::wire::channel_type::MAIN, 0, &common, &channel);
        // header(16) + mess(18) + 1 common-cap word(4) + 0 channel words.
        assert_eq!(packet.len(), LINK_HEADER_SIZE + LINK_MESS_SIZE as usize + 4);
    }
}

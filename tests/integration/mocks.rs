//! An in-process mock SPICE server, speaking just enough of the wire
//! protocol to drive a real [`purespice::Session`] through the link
//! handshake and a handful of MAIN-channel messages end to end.

use purespice::wire::header::{build_packet, HEADER_SIZE};
use purespice::wire::link::{LinkHeader, LinkMess, LINK_HEADER_SIZE, TICKET_PUBKEY_BYTES};
use purespice::wire::{channel_type, common_msg, link_err, main_msg, main_msgc};

use binrw::BinRead;
use rsa::pkcs8::EncodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What the mock MAIN channel tells a connecting client once the link
/// handshake and ack-window setup complete.
pub struct MockMainScript {
    pub session_id: u32,
    pub server_name: Option<String>,
    pub server_uuid: Option<[u8; 16]>,
    pub ack_window: u32,
}

impl Default for MockMainScript {
    fn default() -> Self {
        Self {
            session_id: 7,
            server_name: Some("mock-spice-server".into()),
            server_uuid: Some([0x42; 16]),
            ack_window: 32,
        }
    }
}

pub struct MockSpiceServer {
    listener: TcpListener,
    key: RsaPrivateKey,
    script: MockMainScript,
}

impl MockSpiceServer {
    pub async fn new(script: MockMainScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock listener");
        // 1024-bit RSA is what makes the SubjectPublicKeyInfo DER come out
        // at the classic 162-byte SPICE ticket key size.
        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).expect("generate RSA key");
        Self { listener, key, script }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    /// Accepts exactly one connection, runs the MAIN-channel handshake and
    /// init sequence, then idles echoing nothing until the client
    /// disconnects. Intended to be driven on a background task.
    pub async fn serve_one(self) {
        let (mut stream, _addr) = self.listener.accept().await.expect("accept mock client");
        handle_main_connection(&mut stream, &self.key, &self.script)
            .await
            .expect("mock handshake");
        // Keep the socket open (and draining) until the client hangs up.
        let mut scratch = [0u8; 4096];
        loop {
            match stream.read(&mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }
}

async fn handle_main_connection(
    stream: &mut TcpStream,
    key: &RsaPrivateKey,
    script: &MockMainScript,
) -> std::io::Result<()> {
    let mut header_buf = [0u8; LINK_HEADER_SIZE];
    stream.read_exact(&mut header_buf).await?;
    let mut cursor = std::io::Cursor::new(&header_buf[..]);
    let header = LinkHeader::read(&mut cursor).expect("valid link header from client");
    assert_eq!(header.magic, purespice::wire::SPICE_MAGIC);

    let mut body = vec![0u8; header.size as usize];
    stream.read_exact(&mut body).await?;
    let mut cursor = std::io::Cursor::new(&body[0..18]);
    let mess = LinkMess::read(&mut cursor).expect("valid link mess from client");
    assert_eq!(mess.channel_type, channel_type::MAIN);

    let pub_key_der = key
        .to_public_key()
        .to_public_key_der()
        .expect("encode RSA public key");
    let mut pub_key = [0u8; TICKET_PUBKEY_BYTES];
    let der_bytes = pub_key_der.as_bytes();
    pub_key[..der_bytes.len()].copy_from_slice(der_bytes);

    let common_caps = [1u32 << purespice::wire::caps::common::MINI_HEADER];
    let channel_caps = [1u32 << purespice::wire::caps::main::VM_NAME_UUID];
    let reply_fixed_len = 4 + TICKET_PUBKEY_BYTES + 4 + 4 + 4;
    let mut reply = Vec::with_capacity(reply_fixed_len + 8);
    reply.extend_from_slice(&link_err::OK.to_le_bytes());
    reply.extend_from_slice(&pub_key);
    reply.extend_from_slice(&1u32.to_le_bytes()); // num_common_caps
    reply.extend_from_slice(&1u32.to_le_bytes()); // num_channel_caps
    reply.extend_from_slice(&(reply_fixed_len as u32).to_le_bytes());
    reply.extend_from_slice(&common_caps[0].to_le_bytes());
    reply.extend_from_slice(&channel_caps[0].to_le_bytes());

    let reply_header = LinkHeader::new(reply.len() as u32);
    let mut header_out = std::io::Cursor::new(Vec::new());
    binrw::BinWrite::write(&reply_header, &mut header_out).unwrap();
    stream.write_all(&header_out.into_inner()).await?;
    stream.write_all(&reply).await?;
    stream.flush().await?;

    // Ticket: 4-byte auth mechanism selector followed by the RSA-OAEP
    // ciphertext, exactly `key.size()` bytes.
    let mut mech = [0u8; 4];
    stream.read_exact(&mut mech).await?;
    let mut ticket = vec![0u8; key.size()];
    stream.read_exact(&mut ticket).await?;
    let padding = rsa::Oaep::new::<sha1::Sha1>();
    let _plaintext = key
        .decrypt(padding, &ticket)
        .expect("client ticket decrypts with our own key");

    stream.write_all(&link_err::OK.to_le_bytes()).await?;
    stream.flush().await?;

    // Set a modest ack window before anything else, mirroring a real
    // server's first move on a freshly linked channel.
    let mut set_ack = Vec::with_capacity(8);
    set_ack.extend_from_slice(&1u32.to_le_bytes());
    set_ack.extend_from_slice(&script.ack_window.to_le_bytes());
    send_packet(stream, common_msg::SET_ACK, &set_ack).await?;
    let mut ack_sync = [0u8; HEADER_SIZE + 4];
    stream.read_exact(&mut ack_sync).await?;

    let mut init = Vec::with_capacity(28);
    init.extend_from_slice(&script.session_id.to_le_bytes());
    init.extend_from_slice(&0u32.to_le_bytes()); // display_channels_hint
    // Already client-relative, so the client won't also send a
    // MOUSE_MODE_REQUEST we'd need to drain here.
    init.extend_from_slice(&purespice::wire::mouse_mode::CLIENT.to_le_bytes());
    init.extend_from_slice(&0u32.to_le_bytes()); // is_agent_connected
    init.extend_from_slice(&0u32.to_le_bytes()); // agent_tokens
    init.extend_from_slice(&0u32.to_le_bytes()); // multi_media_time
    init.extend_from_slice(&0u32.to_le_bytes()); // ram_hint
    send_packet(stream, main_msg::INIT, &init).await?;

    // The client replies to MAIN_INIT with ATTACH_CHANNELS (spec.md §4.4).
    let mut attach_header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut attach_header).await?;
    let mut cursor = std::io::Cursor::new(&attach_header[..]);
    let attach = <purespice::wire::header::MiniHeader as BinRead>::read(&mut cursor).unwrap();
    assert_eq!(attach.msg_type, main_msgc::ATTACH_CHANNELS);
    assert_eq!(attach.size, 0);

    // An empty channels list still satisfies the ready-edge precondition.
    send_packet(stream, main_msg::CHANNELS_LIST, &0u32.to_le_bytes()).await?;

    if let Some(name) = &script.server_name {
        let mut payload = Vec::with_capacity(4 + name.len() + 1);
        payload.extend_from_slice(&((name.len() + 1) as u32).to_le_bytes());
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        send_packet(stream, main_msg::NAME, &payload).await?;
    }

    if let Some(uuid) = &script.server_uuid {
        send_packet(stream, main_msg::UUID, uuid).await?;
    }

    Ok(())
}

async fn send_packet(stream: &mut TcpStream, msg_type: u16, payload: &[u8]) -> std::io::Result<()> {
    let packet = build_packet(msg_type, payload);
    stream.write_all(&packet).await?;
    stream.flush().await
}

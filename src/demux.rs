//! Response demultiplexer (spec.md §4.7): drains as many complete
//! frames as a session's receive buffer holds, routing each decoded
//! value back to whichever wait-list entry it answers.

use crate::cache::StateCache;
use crate::manifest::{EntryKind, Manifest, ManifestEntry};
use crate::session::Session;
use crate::wire::{self, Value};

/// Append `bytes` to `session`'s receive buffer and decode every
/// complete frame now available, calling `on_value` for each one with
/// the manifest entry it answers and its decoded value. Malformed or
/// uncorrelated frames are logged and discarded, never fatal (spec.md
/// §7). Stops as soon as the buffer holds less than one complete frame,
/// leaving the remainder for the next arrival.
pub fn feed(
    session: &mut Session,
    bytes: &[u8],
    manifest: &Manifest,
    cache: &mut StateCache,
    mut on_value: impl FnMut(&ManifestEntry, Value),
) {
    session.recv_buffer.extend_from_slice(bytes);
    loop {
        let header = match wire::peek_header(&session.recv_buffer) {
            Ok(header) => header,
            Err(_) => break,
        };
        if !wire::is_complete(&session.recv_buffer, &header) {
            break;
        }
        let frame_len = header.frame_len();

        let entry = match manifest.entry_by_id(header.command_id) {
            Some(entry) => entry.clone(),
            None => {
                log::warn!(
                    "demux: dropping frame for unknown command id {}",
                    header.command_id
                );
                session.recv_buffer.drain(0..frame_len);
                continue;
            }
        };

        if !session.take_waiting(header.command_id) {
            log::debug!(
                "demux: dropping stale frame for {:?} (id {}, not on wait list)",
                entry.name,
                header.command_id
            );
            session.recv_buffer.drain(0..frame_len);
            continue;
        }

        let wire_type = match entry.kind {
            EntryKind::Scalar(wire_type) => wire_type,
            EntryKind::Invokable => {
                log::warn!(
                    "demux: got a data frame for invokable command {:?}",
                    entry.name
                );
                session.recv_buffer.drain(0..frame_len);
                continue;
            }
        };

        let payload = &session.recv_buffer[8..frame_len];
        let value = match wire::decode_payload(wire_type, payload) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("demux: malformed payload for {:?}: {}", entry.name, e);
                session.recv_buffer.drain(0..frame_len);
                continue;
            }
        };

        cache.update(&entry.name, value.clone());
        session.recv_buffer.drain(0..frame_len);
        on_value(&entry, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::parse_manifest_text;
    use crate::session::SessionTag;
    use std::sync::mpsc;

    fn test_session() -> Session {
        // A Session normally owns a live TcpStream; for unit tests of
        // the buffer-draining logic alone we only need its bookkeeping
        // fields, so drive a real loopback pair.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, _rx) = mpsc::channel();
        let client_thread = std::thread::spawn(move || {
            Session::connect(
                SessionTag::Command,
                addr,
                std::time::Duration::ZERO,
                false,
                tx,
            )
            .unwrap()
        });
        let (_server_stream, _peer) = listener.accept().unwrap();
        client_thread.join().unwrap()
    }

    #[test]
    fn split_frame_decodes_once_reassembled() {
        let manifest = parse_manifest_text("1,2,aircraft/0/alt\n");
        let mut cache = StateCache::new();
        let mut session = test_session();
        session.wait_list.push_back(1);

        let mut delivered = Vec::new();
        // segments: [01 00 00], [00 04 00 00 00 00 00], [80 3F]
        feed(&mut session, &[0x01, 0x00, 0x00], &manifest, &mut cache, |e, v| {
            delivered.push((e.name.clone(), v))
        });
        assert!(delivered.is_empty());
        feed(
            &mut session,
            &[0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00],
            &manifest,
            &mut cache,
            |e, v| delivered.push((e.name.clone(), v)),
        );
        assert!(delivered.is_empty());
        feed(&mut session, &[0x80, 0x3F], &manifest, &mut cache, |e, v| {
            delivered.push((e.name.clone(), v))
        });

        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "aircraft/0/alt");
        assert_eq!(delivered[0].1, Value::Float(1.0));
        assert!(session.recv_buffer.is_empty());
    }

    #[test]
    fn two_concatenated_frames_both_decode_in_order() {
        let manifest = parse_manifest_text("1,2,aircraft/0/alt\n2,1,aircraft/0/gear\n");
        let mut cache = StateCache::new();
        let mut session = test_session();
        session.wait_list.push_back(1);
        session.wait_list.push_back(2);

        let mut frame_a = vec![0x01, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00];
        frame_a.extend_from_slice(&[0x00, 0x00, 0x80, 0x3F]); // 1.0f
        let mut frame_b = vec![0x02, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00];
        frame_b.extend_from_slice(&[0x07, 0x00, 0x00, 0x00]); // 7i32

        let mut combined = frame_a;
        combined.extend_from_slice(&frame_b);

        let mut delivered = Vec::new();
        feed(&mut session, &combined, &manifest, &mut cache, |e, v| {
            delivered.push((e.name.clone(), v))
        });

        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].0, "aircraft/0/alt");
        assert_eq!(delivered[1].0, "aircraft/0/gear");
        assert!(session.recv_buffer.is_empty());
    }

    #[test]
    fn unknown_command_id_is_discarded_not_fatal() {
        let manifest = parse_manifest_text("1,2,aircraft/0/alt\n");
        let mut cache = StateCache::new();
        let mut session = test_session();
        // no wait-list entry for id 99 either, but manifest lookup fails first
        let mut frame = vec![0x63, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        frame.push(0x01);
        let mut delivered = Vec::new();
        feed(&mut session, &frame, &manifest, &mut cache, |e, v| {
            delivered.push((e.name.clone(), v))
        });
        assert!(delivered.is_empty());
        assert!(session.recv_buffer.is_empty());
    }

    #[test]
    fn stale_frame_with_no_wait_list_entry_is_discarded() {
        let manifest = parse_manifest_text("1,0,aircraft/0/on-ground\n");
        let mut cache = StateCache::new();
        let mut session = test_session();
        // id 1 is known but nothing is waiting for it (e.g. post-reconnect debris)
        let frame = vec![0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01];
        let mut delivered = Vec::new();
        feed(&mut session, &frame, &manifest, &mut cache, |e, v| {
            delivered.push((e.name.clone(), v))
        });
        assert!(delivered.is_empty());
    }

    #[test]
    fn incomplete_payload_stays_buffered() {
        let manifest = parse_manifest_text("1,1,aircraft/0/count\n");
        let mut cache = StateCache::new();
        let mut session = test_session();
        session.wait_list.push_back(1);
        // declares a 4-byte payload but only 2 bytes have arrived
        let frame = vec![0x01, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut delivered = Vec::new();
        feed(&mut session, &frame, &manifest, &mut cache, |e, v| {
            delivered.push((e.name.clone(), v))
        });
        assert!(delivered.is_empty());
        assert_eq!(session.recv_buffer.len(), 10);
        // id is still on the wait list: nothing was consumed
        assert!(session.wait_list.contains(&1));
    }
}

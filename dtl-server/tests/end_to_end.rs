use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dtl_backend::BackendRegistry;
use dtl_core::ClusterLocation;
use dtl_server::Server;
use dtl_wire::{Codec, Opcode};

/// Starts a memory-backed server on an ephemeral port and returns its address
/// plus a join handle that, once `server.request_stop()` is called, finishes
/// cleanly.
fn start_server() -> (std::net::SocketAddr, Arc<Server>, thread::JoinHandle<()>) {
    let registry = Arc::new(BackendRegistry::memory());
    let server = Arc::new(Server::new("127.0.0.1", 0, 16, registry).unwrap());
    let addr = server.local_addr().unwrap();
    let handle = {
        let server = Arc::clone(&server);
        thread::spawn(move || server.run())
    };
    (addr, server, handle)
}

fn connect(addr: std::net::SocketAddr) -> Codec<TcpStream> {
    let stream = TcpStream::connect(addr).unwrap();
    Codec::new(stream)
}

fn register(codec: &mut Codec<TcpStream>, namespace: &str, cluster_size: u32, owner_tag: u64) -> Opcode {
    codec.cork();
    codec.put_opcode(Opcode::Register).unwrap();
    codec.put_string(Some(namespace)).unwrap();
    codec.put_u32(cluster_size).unwrap();
    codec.put_u64(owner_tag).unwrap();
    codec.uncork().unwrap();
    codec.recv_opcode().unwrap()
}

fn add_entries(codec: &mut Codec<TcpStream>, entries: &[(ClusterLocation, u64, Vec<u8>)]) -> Opcode {
    codec.cork();
    codec.put_opcode(Opcode::AddEntries).unwrap();
    codec.put_u64(entries.len() as u64).unwrap();
    for (loc, lba, data) in entries {
        codec.put_location(*loc).unwrap();
        codec.put_u64(*lba).unwrap();
        codec.put_bytes(Some(data)).unwrap();
    }
    codec.uncork().unwrap();
    codec.recv_opcode().unwrap()
}

fn get_entries(codec: &mut Codec<TcpStream>) -> Vec<(ClusterLocation, u64, Vec<u8>)> {
    codec.cork();
    codec.put_opcode(Opcode::GetEntries).unwrap();
    codec.uncork().unwrap();

    let mut out = Vec::new();
    loop {
        codec.get_cork().unwrap();
        let loc = codec.get_location().unwrap();
        let lba = codec.get_u64().unwrap();
        let data = codec.get_bytes().unwrap();
        if loc.is_none() {
            break;
        }
        out.push((loc, lba, data.unwrap()));
    }
    out
}

fn cluster(n: u32, o: u16, fill: u8) -> (ClusterLocation, u64, Vec<u8>) {
    (ClusterLocation::new(n, o), (n as u64) * 1000 + o as u64, vec![fill; 4096])
}

#[test]
fn happy_path_round_trip_and_clear() {
    let (addr, server, handle) = start_server();
    let mut codec = connect(addr);

    assert_eq!(register(&mut codec, "vol-1", 4096, 1), Opcode::Ok);

    for segment in 1..=3u32 {
        let batch: Vec<_> = (0..32u16).map(|o| cluster(segment, o, 0x62)).collect();
        assert_eq!(add_entries(&mut codec, &batch), Opcode::Ok);
    }

    let entries = get_entries(&mut codec);
    assert_eq!(entries.len(), 96);
    assert!(entries.iter().all(|(_, _, data)| data.len() == 4096 && data.iter().all(|&b| b == 0x62)));

    codec.cork();
    codec.put_opcode(Opcode::Clear).unwrap();
    codec.uncork().unwrap();
    assert_eq!(codec.recv_opcode().unwrap(), Opcode::Ok);
    assert_eq!(get_entries(&mut codec).len(), 0);

    drop(codec);
    server.request_stop();
    handle.join().unwrap();
}

#[test]
fn trim_narrows_the_sco_range() {
    let (addr, server, handle) = start_server();
    let mut codec = connect(addr);
    assert_eq!(register(&mut codec, "vol-trim", 4096, 1), Opcode::Ok);

    for segment in 1..=13u32 {
        assert_eq!(add_entries(&mut codec, &[cluster(segment, 0, 0x01)]), Opcode::Ok);
    }

    let range = |codec: &mut Codec<TcpStream>| -> (ClusterLocation, ClusterLocation) {
        codec.cork();
        codec.put_opcode(Opcode::GetScoRange).unwrap();
        codec.uncork().unwrap();
        codec.get_cork().unwrap();
        (codec.get_location().unwrap(), codec.get_location().unwrap())
    };

    assert_eq!(range(&mut codec), (ClusterLocation::new(1, 0), ClusterLocation::new(13, 0)));

    codec.cork();
    codec.put_opcode(Opcode::RemoveUpTo).unwrap();
    codec.put_location(ClusterLocation::new(7, 0)).unwrap();
    codec.uncork().unwrap();
    assert_eq!(codec.recv_opcode().unwrap(), Opcode::Ok);

    assert_eq!(range(&mut codec), (ClusterLocation::new(8, 0), ClusterLocation::new(13, 0)));

    codec.cork();
    codec.put_opcode(Opcode::Clear).unwrap();
    codec.uncork().unwrap();
    assert_eq!(codec.recv_opcode().unwrap(), Opcode::Ok);
    assert_eq!(range(&mut codec), (ClusterLocation::NONE, ClusterLocation::NONE));

    drop(codec);
    server.request_stop();
    handle.join().unwrap();
}

#[test]
fn selective_replay_via_get_sco() {
    let (addr, server, handle) = start_server();
    let mut codec = connect(addr);
    assert_eq!(register(&mut codec, "vol-sco", 4096, 1), Opcode::Ok);

    for segment in 1..=13u32 {
        let fill = if segment == 4 { 0xAA } else { 0xBB };
        let batch: Vec<_> = (0..32u16).map(|o| cluster(segment, o, fill)).collect();
        assert_eq!(add_entries(&mut codec, &batch), Opcode::Ok);
    }

    codec.cork();
    codec.put_opcode(Opcode::GetSco).unwrap();
    codec.put_location(ClusterLocation::new(4, 0)).unwrap();
    codec.uncork().unwrap();

    let mut got = Vec::new();
    loop {
        codec.get_cork().unwrap();
        let loc = codec.get_location().unwrap();
        let _lba = codec.get_u64().unwrap();
        let data = codec.get_bytes().unwrap();
        if loc.is_none() {
            break;
        }
        got.push((loc, data.unwrap()));
    }

    assert_eq!(got.len(), 32);
    assert!(got.iter().all(|(loc, data)| loc.segment_number == 4 && data.iter().all(|&b| b == 0xAA)));

    drop(codec);
    server.request_stop();
    handle.join().unwrap();
}

#[test]
fn cluster_size_mismatch_is_rejected_and_first_owner_is_untouched() {
    let (addr, server, handle) = start_server();
    let mut first = connect(addr);
    assert_eq!(register(&mut first, "ns", 4096, 1), Opcode::Ok);
    assert_eq!(add_entries(&mut first, &[cluster(1, 0, 0x01)]), Opcode::Ok);

    let mut second = connect(addr);
    assert_eq!(register(&mut second, "ns", 8192, 2), Opcode::NotOk);

    let entries = get_entries(&mut first);
    assert_eq!(entries.len(), 1);

    drop(first);
    drop(second);
    server.request_stop();
    handle.join().unwrap();
}

#[test]
fn reattachment_without_read_wipes_prior_state() {
    let (addr, server, handle) = start_server();
    let mut first = connect(addr);
    assert_eq!(register(&mut first, "ns-reattach", 4096, 1), Opcode::Ok);
    assert_eq!(add_entries(&mut first, &[cluster(1, 0, 0x01)]), Opcode::Ok);
    drop(first);
    thread::sleep(Duration::from_millis(50));

    let mut second = connect(addr);
    assert_eq!(register(&mut second, "ns-reattach", 4096, 2), Opcode::Ok);
    assert_eq!(add_entries(&mut second, &[cluster(1, 0, 0x02)]), Opcode::Ok);

    let entries = get_entries(&mut second);
    assert_eq!(entries.len(), 1);
    assert!(entries[0].2.iter().all(|&b| b == 0x02));

    drop(second);
    server.request_stop();
    handle.join().unwrap();
}

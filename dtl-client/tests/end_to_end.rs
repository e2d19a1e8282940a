use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use dtl_backend::BackendRegistry;
use dtl_client::{BridgeFactory, Mode, Proxy};
use dtl_core::{ClusterEntry, ClusterLocation};
use dtl_server::Server;

fn start_server() -> (SocketAddr, Arc<Server>, thread::JoinHandle<()>) {
    let registry = Arc::new(BackendRegistry::memory());
    let server = Arc::new(Server::new("127.0.0.1", 0, 16, registry).unwrap());
    let addr = server.local_addr().unwrap();
    let handle = {
        let server = Arc::clone(&server);
        thread::spawn(move || server.run())
    };
    (addr, server, handle)
}

fn cluster(n: u32, o: u16, fill: u8) -> ClusterEntry {
    ClusterEntry::new(ClusterLocation::new(n, o), (n as u64) * 1000 + o as u64, vec![fill; 4096])
}

#[test]
fn proxy_round_trip_add_get_and_clear() {
    let (addr, server, handle) = start_server();
    let mut proxy = Proxy::connect(&addr.ip().to_string(), addr.port(), "vol-proxy", 4096, 1, 5).unwrap();
    assert_eq!(proxy.cluster_size(), 4096);

    let batch: Vec<_> = (0..8u16).map(|o| cluster(1, o, 0x9C)).collect();
    proxy.add_entries(&batch).unwrap();

    let mut got = Vec::new();
    proxy.get_entries(&mut |loc, lba, data| got.push((loc, lba, data))).unwrap();
    assert_eq!(got.len(), 8);
    assert!(got.iter().all(|(_, _, data)| data.iter().all(|&b| b == 0x9C)));

    proxy.clear().unwrap();
    let mut after_clear = Vec::new();
    proxy.get_entries(&mut |loc, lba, data| after_clear.push((loc, lba, data))).unwrap();
    assert!(after_clear.is_empty());

    drop(proxy);
    server.request_stop();
    handle.join().unwrap();
}

#[test]
fn proxy_rejects_malformed_batch_without_touching_the_wire() {
    let (addr, server, handle) = start_server();
    let mut proxy = Proxy::connect(&addr.ip().to_string(), addr.port(), "vol-malformed", 4096, 1, 5).unwrap();

    let gap = vec![cluster(1, 0, 0x01), cluster(1, 2, 0x01)];
    assert!(proxy.add_entries(&gap).is_err());

    // The connection must still be usable afterwards.
    proxy.add_entries(&[cluster(1, 0, 0x02)]).unwrap();

    drop(proxy);
    server.request_stop();
    handle.join().unwrap();
}

#[test]
fn unregister_on_drop_lets_a_different_cluster_size_reclaim_the_namespace() {
    let (addr, server, handle) = start_server();
    let mut first = Proxy::connect(&addr.ip().to_string(), addr.port(), "vol-unregister", 4096, 1, 5).unwrap();
    first.add_entries(&[cluster(1, 0, 0x01)]).unwrap();
    first.set_delete_failover_dir(true);
    drop(first);

    // A fresh cluster size is only accepted once the old backend is gone.
    let second = Proxy::connect(&addr.ip().to_string(), addr.port(), "vol-unregister", 8192, 1, 5);
    assert!(second.is_ok());

    drop(second);
    server.request_stop();
    handle.join().unwrap();
}

#[test]
fn bridge_factory_wires_a_working_async_bridge() {
    let (addr, server, handle) = start_server();
    let proxy = Proxy::connect(&addr.ip().to_string(), addr.port(), "vol-factory", 4096, 1, 5).unwrap();
    let mut bridge = BridgeFactory::create(Mode::Asynchronous, Some(proxy), 4096, 1, 32, 4);
    assert_eq!(bridge.mode(), Mode::Asynchronous);

    let locations: Vec<_> = (0..4u16).map(|o| ClusterLocation::new(1, o)).collect();
    bridge.add_entries(&locations, 0, &[0x5Eu8; 4 * 4096]).unwrap();
    bridge.flush().unwrap();

    let mut got = Vec::new();
    bridge
        .get_sco_from_failover(ClusterLocation::new(1, 0), &mut |loc, _lba, data| got.push((loc, data)))
        .unwrap();
    assert_eq!(got.len(), 4);

    bridge.destroy(false);
    server.request_stop();
    handle.join().unwrap();
}

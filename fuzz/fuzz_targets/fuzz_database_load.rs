#![no_main]
use ipdb::Database;
use libfuzzer_sys::fuzz_target;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

// Treat the input as a database image and, if it loads, use its first bytes
// as lookup keys and walk every network
fuzz_target!(|data: &[u8]| {
    let Ok(db) = Database::from_bytes(data.to_vec()) else {
        return;
    };

    let mut v6 = [0u8; 16];
    for (dst, src) in v6.iter_mut().zip(data.iter()) {
        *dst = *src;
    }
    let v4 = Ipv4Addr::new(v6[0], v6[1], v6[2], v6[3]);

    let _ = db.lookup_with_prefix_len(IpAddr::V4(v4));
    let _ = db.lookup_network(IpAddr::V6(Ipv6Addr::from(v6)));
    let _ = db.get("::ffff:1.2.3.4");

    for item in db.networks().take(1024) {
        if item.is_err() {
            break;
        }
    }
});

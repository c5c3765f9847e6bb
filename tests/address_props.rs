mod common;

use geoscope::{class_of, classify, AddressClass, GeoEngine, LookupError};
use proptest::prelude::*;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

proptest! {
    #[test]
    fn test_arbitrary_input_never_panics(text in ".{0,64}") {
        match classify(&text) {
            Ok(address) => prop_assert_eq!(address.ip(), text.trim().parse::<IpAddr>().unwrap()),
            Err(e) => prop_assert!(
                matches!(e, LookupError::InvalidFormat { .. }),
                "unexpected error {:?}",
                e
            ),
        }
    }

    #[test]
    fn test_dotted_quads_parse(a in any::<u8>(), b in any::<u8>(), c in any::<u8>(), d in any::<u8>()) {
        let text = format!("{}.{}.{}.{}", a, b, c, d);
        let address = classify(&text).unwrap();
        prop_assert_eq!(address.ip(), IpAddr::V4(Ipv4Addr::new(a, b, c, d)));
    }

    #[test]
    fn test_out_of_range_octets_are_malformed(a in 256u32..100_000, b in any::<u8>()) {
        prop_assert_eq!(class_of(&format!("{}.{}.1.1", a, b)), AddressClass::Malformed);
    }

    #[test]
    fn test_rfc1918_is_private(b in any::<u8>(), c in any::<u8>(), d in any::<u8>()) {
        prop_assert_eq!(class_of(&format!("10.{}.{}.{}", b, c, d)), AddressClass::Private);
        prop_assert_eq!(class_of(&format!("192.168.{}.{}", c, d)), AddressClass::Private);
        prop_assert_eq!(class_of(&format!("172.{}.{}.{}", 16 + (b % 16), c, d)), AddressClass::Private);
    }

    #[test]
    fn test_google_range_is_public(b in any::<u8>(), c in any::<u8>(), d in any::<u8>()) {
        prop_assert_eq!(class_of(&format!("8.{}.{}.{}", b, c, d)), AddressClass::Public);
    }

    #[test]
    fn test_link_local_v6_is_private(segments in prop::array::uniform7(any::<u16>())) {
        let ip = Ipv6Addr::new(
            0xfe80, segments[0], segments[1], segments[2],
            segments[3], segments[4], segments[5], segments[6],
        );
        prop_assert_eq!(class_of(&ip.to_string()), AddressClass::Private);
    }

    #[test]
    fn test_ipv4_compatible_v6_is_private(raw in any::<u32>()) {
        let ip = Ipv4Addr::from(raw).to_ipv6_compatible();
        prop_assert_eq!(class_of(&ip.to_string()), AddressClass::Private);
    }
}

#[test]
fn test_public_lookups_never_panic() {
    let dir = tempfile::tempdir().unwrap();
    common::write_all(dir.path());
    let engine = GeoEngine::new(common::quiet_config(dir.path())).unwrap();

    let mut runner = proptest::test_runner::TestRunner::default();
    runner
        .run(&any::<u32>(), |raw| {
            let ip = Ipv4Addr::from(raw).to_string();
            match engine.lookup(&ip) {
                Ok(record) => prop_assert_eq!(record.ip.to_string(), ip),
                Err(e) => prop_assert!(!e.is_retryable()),
            }
            Ok(())
        })
        .unwrap();
}

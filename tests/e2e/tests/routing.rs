//! Routing scenarios: direct links, multi-hop discovery, unreachable
//! destinations and pass-through chains

use netsim_e2e::*;
use netsim_kernel::{exit_code, DeviceRole, PortKind, SimulationBuilder};
use serde_json::json;
use std::time::Duration;

const LIMIT: Duration = Duration::from_secs(20);

#[test_log::test]
fn test_direct_link_delivers_in_one_hop() {
    let mut builder = line(test_config(), PortKind::Classic, &["a", "b"]).unwrap();
    builder.add_application("a", sender("b", vec![json!("hello")])).unwrap();
    builder
        .add_application("b", receiver(1, Duration::from_secs(5)))
        .unwrap();

    let result = run_bounded(builder.build().unwrap(), LIMIT).unwrap();

    assert_eq!(exit_codes(&result, "a", SENDER), vec![exit_code::OK as i64]);
    let packets = received(&result, "b", RECEIVER);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0]["from"], json!("a"));
    assert_eq!(packets[0]["hops"], json!(1));
    assert_eq!(packets[0]["payload"], json!("hello"));
    assert_eq!(result.route_queries, 0);
    assert_all_stopped(&result, &["a", "b"]).unwrap();
}

#[test_log::test]
fn test_multi_hop_route_is_discovered_once_and_cached() {
    let mut builder = line(test_config(), PortKind::Classic, &["a", "b", "c"]).unwrap();
    builder
        .add_application("a", sender("c", vec![json!(1), json!(2)]))
        .unwrap();
    builder
        .add_application("c", receiver(2, Duration::from_secs(5)))
        .unwrap();

    let result = run_bounded(builder.build().unwrap(), LIMIT).unwrap();

    assert_eq!(
        exit_codes(&result, "a", SENDER),
        vec![exit_code::OK as i64, exit_code::OK as i64]
    );
    let packets = received(&result, "c", RECEIVER);
    assert_eq!(packets.len(), 2);
    for packet in &packets {
        assert_eq!(packet["hops"], json!(2));
    }
    assert_eq!(result.route_queries, 1);
}

#[test_log::test]
fn test_unreachable_destination_reports_no_route() {
    let mut builder = line(test_config(), PortKind::Classic, &["a", "b"]).unwrap();
    builder.add_device("island", DeviceRole::Ordinary).unwrap();
    builder
        .add_application("a", sender("island", vec![json!("lost")]))
        .unwrap();

    let result = run_bounded(builder.build().unwrap(), LIMIT).unwrap();

    assert_eq!(
        exit_codes(&result, "a", SENDER),
        vec![exit_code::NO_ROUTE as i64]
    );
    assert_eq!(result.route_queries, 1);
}

#[test_log::test]
fn test_route_respects_channel_kind() {
    // Classic path exists, quantum one does not
    let mut builder = line(test_config(), PortKind::Classic, &["a", "b"]).unwrap();
    builder
        .add_application(
            "a",
            netsim_kernel::ApplicationSpec::new("qsender", |app| {
                let qubits = app.allocate_qubits(1).unwrap_or_default();
                let code = app.send_qubits("b", RECEIVER, qubits);
                app.dump(json!({ "exit_code": code }));
                Ok(())
            }),
        )
        .unwrap();

    let result = run_bounded(builder.build().unwrap(), LIMIT).unwrap();
    let codes = exit_codes(&result, "a", "qsender");
    assert_eq!(codes.len(), 1);
    assert!(codes[0] < 0);
}

#[test_log::test]
fn test_pass_through_chain_is_transparent() {
    let mut builder = SimulationBuilder::new(test_config());
    builder.add_device("a", DeviceRole::Ordinary).unwrap();
    builder.add_device("otg", DeviceRole::PassThrough).unwrap();
    builder.add_device("c", DeviceRole::Ordinary).unwrap();
    builder.add_channel(PortKind::Classic, "a", "otg", 1.0).unwrap();
    builder.add_channel(PortKind::Classic, "otg", "c", 1.0).unwrap();
    builder.add_application("a", sender("c", vec![json!("through")])).unwrap();
    builder
        .add_application("c", receiver(1, Duration::from_secs(5)))
        .unwrap();

    let result = run_bounded(builder.build().unwrap(), LIMIT).unwrap();

    assert_eq!(exit_codes(&result, "a", SENDER), vec![exit_code::OK as i64]);
    let packets = received(&result, "c", RECEIVER);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0]["hops"], json!(1));
    assert_eq!(result.route_queries, 0);
    assert_all_stopped(&result, &["a", "otg", "c"]).unwrap();
}

//! Heartbeat scenarios: manual refresh sees a silenced peer and the link
//! stops carrying traffic

use netsim_e2e::*;
use netsim_kernel::{exit_code, ApplicationSpec, PortKind, PortRef};
use serde_json::json;
use std::time::Duration;

#[test_log::test]
fn test_manual_refresh_detects_silenced_peer() {
    let mut builder = line(test_config(), PortKind::Classic, &["a", "b"]).unwrap();
    let port = PortRef::classic(0);

    builder
        .add_application(
            "a",
            ApplicationSpec::new("pinger", move |app| {
                // let b's socket come up
                app.sleep(Duration::from_millis(150));
                let before = app.refresh_heartbeat(true).and_then(|report| report.is_alive(port));
                app.dump(json!({ "phase": "before", "alive": before }));
                app.sleep(Duration::from_millis(700));
                let after = app.refresh_heartbeat(true).and_then(|report| report.is_alive(port));
                app.dump(json!({ "phase": "after", "alive": after }));
                let code = app.send_classic("b", "silent", json!("anyone?"));
                app.dump(json!({ "exit_code": code }));
                Ok(())
            }),
        )
        .unwrap();
    builder
        .add_application(
            "b",
            ApplicationSpec::new("silent", move |app| {
                app.sleep(Duration::from_millis(400));
                let code = app.set_port_active(port, false);
                app.dump(json!({ "exit_code": code }));
                app.sleep(Duration::from_millis(800));
                Ok(())
            }),
        )
        .unwrap();

    let result = run_bounded(builder.build().unwrap(), Duration::from_secs(20)).unwrap();

    let records = result.channel("a", "pinger");
    let alive: Vec<_> = records.iter().filter_map(|r| r.get("alive")).collect();
    assert_eq!(alive, vec![&json!(true), &json!(false)]);

    let codes = exit_codes(&result, "a", "pinger");
    assert_eq!(codes.len(), 1);
    assert!(codes[0] < 0, "send over a dead link returned {}", codes[0]);
    assert_eq!(exit_codes(&result, "b", "silent"), vec![exit_code::OK as i64]);
}

#[test_log::test]
fn test_port_status_lists_connected_ports() {
    let mut builder = line(test_config(), PortKind::Classic, &["a", "b"]).unwrap();
    builder
        .add_application(
            "a",
            ApplicationSpec::new("inspector", |app| {
                let ports = app.port_status().unwrap_or_default();
                for snapshot in ports {
                    app.dump(json!({
                        "active": snapshot.active,
                        "connected": snapshot.connected,
                        "target": snapshot.target.map(|t| t.label),
                    }));
                }
                Ok(())
            }),
        )
        .unwrap();

    let result = run_bounded(builder.build().unwrap(), Duration::from_secs(20)).unwrap();
    let records = result.channel("a", "inspector");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["active"], json!(true));
    assert_eq!(records[0]["connected"], json!(true));
    assert_eq!(records[0]["target"], json!("b"));
}

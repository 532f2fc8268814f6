//! Application fixtures shared by the scenarios

use netsim_kernel::ApplicationSpec;
use serde_json::{json, Value};
use std::time::Duration;

pub const SENDER: &str = "sender";
pub const RECEIVER: &str = "receiver";

/// Sends each payload to `RECEIVER` on device `to` and dumps the exit code
pub fn sender(to: &str, payloads: Vec<Value>) -> ApplicationSpec {
    let to = to.to_string();
    ApplicationSpec::new(SENDER, move |app| {
        for payload in &payloads {
            let code = app.send_classic(&to, RECEIVER, payload.clone());
            app.dump(json!({ "exit_code": code }));
        }
        Ok(())
    })
}

/// Receives up to `expected` classic packets, dumping sender, hops and
/// payload of each. Gives up after `timeout` without traffic.
pub fn receiver(expected: usize, timeout: Duration) -> ApplicationSpec {
    ApplicationSpec::new(RECEIVER, move |app| {
        for _ in 0..expected {
            match app.recv_classic(None, timeout) {
                Some(packet) => app.dump(json!({
                    "from": packet.sender,
                    "hops": packet.hops,
                    "payload": packet.classic_payload(),
                })),
                None => {
                    app.dump(json!({ "timeout": true }));
                    break;
                }
            }
        }
        Ok(())
    })
}

/// Ignores cancellation and sleeps for `duration`
pub fn unresponsive(label: &str, duration: Duration) -> ApplicationSpec {
    ApplicationSpec::new(label, move |_| {
        std::thread::sleep(duration);
        Ok(())
    })
}

/// Sleeps cooperatively until the device cancels it
pub fn patient(label: &str) -> ApplicationSpec {
    ApplicationSpec::new(label, |app| {
        while app.sleep(Duration::from_millis(10)) {}
        Ok(())
    })
}

#![allow(dead_code)]

use std::sync::Arc;

use nodectl::{DeviceEnd, LogicalClock, Ticks};

/// A shell stand-in for a device CLI: prompt `> `, echoes commands, answers
/// `state` with `leader`, and rejects anything it does not know.
pub const FAKE_CLI: &str = r#"
printf '> '
while IFS= read -r line; do
  line=$(printf '%s' "$line" | tr -d '\r')
  case "$line" in
    "") printf '> ' ;;
    exit) exit 0 ;;
    state) printf 'state\r\n[I] Mle-----------: polled\r\nleader\r\nDone\r\n> ' ;;
    ifconfig*|thread*) printf '%s\r\nDone\r\n> ' "$line" ;;
    hang) printf 'hang\r\n' ;;
    *) printf '%s\r\nError 35: InvalidCommand\r\n> ' "$line" ;;
  esac
done
"#;

/// Drive `device` as a small simulated node until the console hangs up.
///
/// `thread start` becomes leader five virtual seconds later and handles no
/// input until then. `hang` is echoed and never answered. `drop` hangs up
/// mid-response.
pub async fn simulated_node(mut device: DeviceEnd, clock: Arc<LogicalClock>) {
    let mut role = "detached";

    while let Some(line) = device.recv_line().await {
        match line.as_str() {
            "" => {
                device.emit_raw("> ");
                continue;
            }
            "exit" => break,
            _ => {}
        }

        device.emit(&format!("> {line}"));
        match line.as_str() {
            "state" => {
                device.emit(role);
                device.emit("Done");
            }
            "ifconfig up" => {
                device.emit("Done");
            }
            "thread start" => {
                device.emit("[I] Mle-----------: attaching");
                device.emit("Done");
                device.emit_raw("> ");
                clock.sleep(Ticks::from_secs(5)).await;
                device.emit("[N] Mle-----------: Role detached -> leader");
                role = "leader";
                continue;
            }
            "ipaddr" => {
                device.emit("fdde:ad00:beef:0:0:ff:fe00:fc00");
                device.emit("[D] Mac-----------: frame");
                device.emit("");
                device.emit("fe80:0:0:0:a8d3:7e39:26f6:8f4e");
                device.emit("Done");
            }
            "child table" => {
                device.emit("| ID  | RLOC16 | Timeout    |R|D|N| Extended MAC     |");
                device.emit("+-----+--------+------------+-+-+-+------------------+");
                device.emit("|   1 | 0xc801 |        240 |1|1|1| 4ecede68435358ac |");
                device.emit("Done");
            }
            "hang" => {}
            "drop" => {
                device.emit("partial");
                device.hang_up();
            }
            "badarg" => {
                device.emit("Error 7: InvalidArgs");
            }
            _ => {
                device.emit("Error 35: InvalidCommand");
            }
        }
        device.emit_raw("> ");
    }
}

//! Device info and port listing command implementations.

use {
    crate::{
        config::Config,
        serial::{self, SerialOptions},
    },
    anyhow::Result,
    console::style,
    flipdeploy::{DetectedPort, DeviceInfo, candidate_ports, discover_ports},
};

fn port_json(port: &DetectedPort) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "device": port.device.name(),
        "flipper": port.is_flipper(),
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial,
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = discover_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected
            .iter()
            .map(port_json)
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
                "candidates": candidate_ports(),
            }
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output)?
        );
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Available serial ports:")
            .bold()
            .underlined()
    );

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        let kind = if port.is_flipper() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        };
        let product = port
            .product
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{kind}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan(),
        );
    }

    if let Some(first) = candidate_ports().first() {
        eprintln!(
            "\n{} Auto-detect would try {} first",
            style("→")
                .green()
                .bold(),
            style(first)
                .cyan()
                .bold()
        );
    }

    Ok(())
}

fn info_json(port: &str, info: &DeviceInfo) -> serde_json::Value {
    let fields: serde_json::Map<String, serde_json::Value> = info
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    serde_json::json!({
        "ok": true,
        "data": {
            "port": port,
            "firmware": info.firmware_identifier(),
            "hardware_name": info.hardware_name(),
            "fields": fields,
        }
    })
}

/// Info command implementation.
pub(crate) fn cmd_info(options: &SerialOptions, config: &Config, json: bool) -> Result<()> {
    let mut client = serial::connect(options, config)?;
    let info = client.device_info()?;
    let port = client
        .port_name()
        .to_string();
    client.disconnect()?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info_json(&port, &info))?
        );
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Device information:")
            .bold()
            .underlined()
    );
    eprintln!("  Port:     {}", style(&port).cyan());
    eprintln!(
        "  Name:     {}",
        style(info.hardware_name().unwrap_or("unknown")).cyan()
    );
    eprintln!(
        "  Firmware: {}",
        style(info.firmware_identifier())
            .green()
            .bold()
    );

    let width = info
        .fields
        .iter()
        .map(|(k, _)| k.len())
        .max()
        .unwrap_or(0);
    eprintln!();
    for (key, value) in &info.fields {
        eprintln!("  {key:<width$} : {value}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, flipdeploy::DeviceKind};

    #[test]
    fn test_port_json_fields() {
        let port = DetectedPort {
            name: "/dev/ttyACM0".to_string(),
            device: DeviceKind::Flipper,
            vid: Some(0x0483),
            pid: Some(0x5740),
            manufacturer: Some("Flipper Devices Inc.".to_string()),
            product: Some("Mazincea Flip".to_string()),
            serial: Some("flip_Mazincea".to_string()),
        };
        let value = port_json(&port);
        assert_eq!(value["name"], "/dev/ttyACM0");
        assert_eq!(value["flipper"], true);
        assert_eq!(value["vid"], 0x0483);
        assert_eq!(value["product"], "Mazincea Flip");
    }

    #[test]
    fn test_info_json_envelope() {
        let info = DeviceInfo::parse(
            "hardware_name : Mazincea\r\nfirmware_origin_fork : Momentum\r\nfirmware_version : 0.103.1\r\nfirmware_commit : 1a2b3c4d\r\n",
        );
        let value = info_json("/dev/ttyACM0", &info);
        assert_eq!(value["ok"], true);
        assert_eq!(value["data"]["firmware"], "Momentum 0.103.1 (1a2b3c4d)");
        assert_eq!(value["data"]["hardware_name"], "Mazincea");
        assert_eq!(value["data"]["fields"]["firmware_version"], "0.103.1");
    }

    #[test]
    fn test_info_json_without_fields() {
        let value = info_json("COM3", &DeviceInfo::default());
        assert_eq!(value["data"]["firmware"], "unknown");
        assert!(value["data"]["hardware_name"].is_null());
    }
}

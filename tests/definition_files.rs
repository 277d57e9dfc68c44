//! Loading the bundled prototype files and settings-driven mounting.

use std::io::Write;
use std::path::PathBuf;

use scpi_subsystem::config::{MountSettings, Settings};
use scpi_subsystem::subsystem::load_definitions;
use scpi_subsystem::transport::MockTransport;
use scpi_subsystem::units::Quantity;
use scpi_subsystem::{Device, ScpiError, Value};
use tempfile::Builder;

fn prototype_file(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("prototypes")
        .join(name)
}

#[test]
fn test_hp33120a_definitions() {
    let defs = load_definitions(prototype_file("hp33120a.toml")).unwrap();
    assert_eq!(defs.names().collect::<Vec<_>>(), vec!["source", "system"]);

    let mock = MockTransport::new();
    let mut device = Device::new(mock.clone());
    device.mount(&defs.build("source").unwrap()).unwrap();
    device.mount(&defs.build("system").unwrap()).unwrap();

    let source = device.find("source[1]").unwrap();
    let names = device.accessor_names(source).unwrap();
    for expected in [
        "frequency",
        "frequency_min",
        "frequency_to_max",
        "shape",
        "shape_choices",
        "amplitude_unit",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing {}", expected);
    }

    device.write(source, "shape", "dc").unwrap();
    device
        .write(source, "frequency", Quantity::parse("2.5 kHz").unwrap())
        .unwrap();
    device.trigger(source, "frequency_to_min").unwrap();
    let am = device.find("source[1].am").unwrap();
    device.write(am, "enabled", true).unwrap();

    let system = device.find("system").unwrap();
    device.trigger(system, "reset").unwrap();

    assert_eq!(
        mock.writes(),
        vec![
            "source1:function:shape DC",
            "source1:frequency 2500",
            "source1:frequency min",
            "source1:am:state 1",
            "*RST",
        ]
    );
}

#[test]
fn test_magnapower_split_output() {
    let defs = load_definitions(prototype_file("magnapower_sl.toml")).unwrap();
    let mock = MockTransport::new();
    let mut device = Device::new(mock.clone());
    let output = device
        .mount(&defs.build("output").unwrap())
        .unwrap()
        .single()
        .unwrap();

    device.write(output, "set_enabled", true).unwrap();
    device.write(output, "set_enabled", false).unwrap();
    assert_eq!(mock.writes(), vec!["output:start", "output:stop"]);

    let measure = device
        .mount(&defs.build("measure").unwrap())
        .unwrap()
        .single()
        .unwrap();
    mock.set_reply("measure:voltage?", "12.5");
    let volts = device.read(measure, "get_voltage").unwrap();
    assert_eq!(volts.as_quantity().unwrap().magnitude(), 12.5);
}

#[test]
fn test_json_definitions() {
    let mut file = Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(
        br#"{
          "prototypes": [{
            "name": "trigger",
            "commands": [
              ["source", "trigger:source", "choice", {"immediate": "IMM", "bus": "BUS"}],
              {"name": "delay", "command": "trigger:delay", "converter": "qty", "arg": "s"}
            ]
          }]
        }"#,
    )
    .unwrap();

    let defs = load_definitions(file.path()).unwrap();
    let mut device = Device::new(MockTransport::new().with_reply("trigger:source?", "bus"));
    let trigger = device
        .mount(&defs.build("trigger").unwrap())
        .unwrap()
        .single()
        .unwrap();
    assert_eq!(
        device.read(trigger, "source").unwrap(),
        Value::Text("bus".to_string())
    );
    assert!(device.write(trigger, "delay", 1.0).is_err());
}

#[test]
fn test_unknown_extension_rejected() {
    let file = Builder::new().suffix(".yaml").tempfile().unwrap();
    assert!(matches!(
        load_definitions(file.path()),
        Err(ScpiError::Specification(_))
    ));
}

#[test]
fn test_settings_mount_all() {
    let mut settings = Settings::default();
    settings.device.definitions = vec![prototype_file("hp33120a.toml")];
    settings.mounts = vec![
        MountSettings {
            prototype: "source".to_string(),
            channels: Some(2),
            zero_indexed: None,
        },
        MountSettings {
            prototype: "system".to_string(),
            channels: None,
            zero_indexed: None,
        },
    ];
    settings.validate().unwrap();

    let defs = settings.load_definitions().unwrap();
    let mut device = Device::new(MockTransport::new());
    settings.mount_all(&mut device, &defs).unwrap();

    assert_eq!(device.child_names(), vec!["source", "system"]);
    assert!(device.find("source[2].fm").is_ok());
    assert!(matches!(
        device.find("source[3]"),
        Err(ScpiError::ChannelNotFound { .. })
    ));
}

#[test]
fn test_mount_unknown_prototype() {
    let mut settings = Settings::default();
    settings.mounts.push(MountSettings {
        prototype: "scope".to_string(),
        channels: None,
        zero_indexed: None,
    });
    let mut device = Device::new(MockTransport::new());
    let defs = settings.load_definitions().unwrap();
    assert!(matches!(
        settings.mount_all(&mut device, &defs),
        Err(ScpiError::SubsystemNotFound(_))
    ));
}

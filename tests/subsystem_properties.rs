//! End-to-end behaviour of compiled subsystems against a mock transport.

use scpi_subsystem::command::CommandDefinition;
use scpi_subsystem::converter::{ChoiceMap, ConverterKind, NumericType, UnitSpec};
use scpi_subsystem::device::{InstanceOptions, ParentRef, Target};
use scpi_subsystem::transport::MockTransport;
use scpi_subsystem::units::Quantity;
use scpi_subsystem::{
    ConversionError, Device, Prototype, ScpiError, SubsystemTemplate, Value,
};
use std::sync::Arc;

fn hz() -> ConverterKind {
    ConverterKind::Quantity(UnitSpec::parse("Hz").unwrap())
}

fn shapes() -> ChoiceMap {
    ChoiceMap::new()
        .with("sinusoid", "SIN")
        .with("square", "SQU")
        .with("triangle", "TRI")
}

fn generator() -> Arc<SubsystemTemplate> {
    let am = Prototype::new("am")
        .indexed(2)
        .command(CommandDefinition::new(
            "frequency",
            "source{source}:am{am}:frequency",
            hz(),
        ));
    let source = Prototype::new("source")
        .indexed(4)
        .command(CommandDefinition::new("frequency", "source{source}:frequency", hz()))
        .command(CommandDefinition::new(
            "shape",
            "source{source}:function:shape",
            ConverterKind::Choice(shapes()),
        ))
        .command(CommandDefinition::new(
            "duty_cycle",
            "source{source}:pulse:dcycle",
            ConverterKind::Quantity(UnitSpec::Percent),
        ))
        .command(CommandDefinition::new(
            "enabled",
            "output{source}:state",
            ConverterKind::Boolean,
        ))
        .subsystem(am);
    SubsystemTemplate::build(&source).unwrap()
}

fn system() -> Arc<SubsystemTemplate> {
    SubsystemTemplate::build(
        &Prototype::new("system")
            .command(CommandDefinition::new("error", "system:error", ConverterKind::Error))
            .command(
                CommandDefinition::new(
                    "voltage",
                    "volt",
                    ConverterKind::Quantity(UnitSpec::parse("V").unwrap()),
                )
                .can_write(false)
                .query_keywords(["min", "max"]),
            ),
    )
    .unwrap()
}

fn setup() -> (Device, MockTransport) {
    let mock = MockTransport::new();
    (Device::new(mock.clone()), mock)
}

#[test]
fn test_boolean_round_trip() {
    let (mut device, mock) = setup();
    let ch1 = device.mount(&generator()).unwrap().channel(1).unwrap();

    device.write(ch1, "enabled", true).unwrap();
    device.write(ch1, "enabled", false).unwrap();
    assert_eq!(mock.writes(), vec!["output1:state 1", "output1:state 0"]);

    mock.push_reply("1");
    assert_eq!(device.read(ch1, "enabled").unwrap(), Value::Bool(true));
    mock.push_reply("0");
    assert_eq!(device.read(ch1, "enabled").unwrap(), Value::Bool(false));
}

#[test]
fn test_quantity_conversion() {
    let (mut device, mock) = setup();
    let ch1 = device.mount(&generator()).unwrap().channel(1).unwrap();

    device
        .write(ch1, "frequency", Quantity::parse("100 mHz").unwrap())
        .unwrap();
    assert_eq!(mock.writes(), vec!["source1:frequency 0.1"]);

    mock.push_reply("500");
    let value = device.read(ch1, "frequency").unwrap();
    let q = value.as_quantity().unwrap();
    assert_eq!(q.magnitude(), 500.0);
    assert_eq!(q.unit().symbol(), "Hz");
}

#[test]
fn test_quantity_rejects_wrong_dimension_and_bare_numbers() {
    let (mut device, mock) = setup();
    let ch1 = device.mount(&generator()).unwrap().channel(1).unwrap();

    let err = device
        .write(ch1, "frequency", Quantity::parse("3 m").unwrap())
        .unwrap_err();
    assert!(matches!(
        err,
        ScpiError::Conversion(ConversionError::UnitMismatch { found: Some(_), .. })
    ));

    let err = device.write(ch1, "frequency", 100.0).unwrap_err();
    assert!(matches!(err, ScpiError::Conversion(e) if e.is_missing_units()));
    assert!(mock.call_log().is_empty());
}

#[test]
fn test_percent_is_a_ratio() {
    let (mut device, mock) = setup();
    let ch1 = device.mount(&generator()).unwrap().channel(1).unwrap();

    mock.push_reply("15.0");
    assert_eq!(device.read(ch1, "duty_cycle").unwrap(), Value::Float(0.15));

    device.write(ch1, "duty_cycle", 0.021).unwrap();
    assert_eq!(mock.writes(), vec!["source1:pulse:dcycle 2.1"]);
}

#[test]
fn test_choice_round_trip() {
    let (mut device, mock) = setup();
    let ch1 = device.mount(&generator()).unwrap().channel(1).unwrap();

    device.write(ch1, "shape", "square").unwrap();
    assert_eq!(mock.writes(), vec!["source1:function:shape SQU"]);

    mock.push_reply("SQU");
    assert_eq!(device.read(ch1, "shape").unwrap(), Value::Text("square".into()));

    let err = device.write(ch1, "shape", "sawtooth").unwrap_err();
    assert!(matches!(
        err,
        ScpiError::Conversion(ConversionError::ChoiceLookup { .. })
    ));

    mock.push_reply("RAMP");
    assert!(matches!(
        device.read(ch1, "shape"),
        Err(ScpiError::Conversion(ConversionError::ChoiceLookup { .. }))
    ));
    assert_eq!(
        device.choices(ch1, "shape_choices").unwrap(),
        vec!["sinusoid", "square", "triangle"]
    );
}

#[test]
fn test_error_queue() {
    let (mut device, mock) = setup();
    let sys = device.mount(&system()).unwrap().single().unwrap();

    mock.set_reply("system:error?", "+0,\"No Error\"");
    assert_eq!(
        device.read(sys, "get_error").unwrap(),
        Value::ErrorReport {
            code: 0,
            message: "No Error".to_string()
        }
    );

    for name in ["get_error", "error", "set_error"] {
        assert!(matches!(
            device.write(sys, name, 1),
            Err(ScpiError::NotSupported { .. })
        ));
    }
    assert!(mock.writes().is_empty());
}

#[test]
fn test_query_only_accessor_surface() {
    let (mut device, mock) = setup();
    let sys = device.mount(&system()).unwrap().single().unwrap();

    let names = device.accessor_names(sys).unwrap();
    assert_eq!(
        names,
        vec!["get_error", "get_voltage", "voltage_min", "voltage_max"]
    );
    assert!(!names.iter().any(|n| n == "voltage" || n == "set_voltage"));

    mock.set_reply("volt? max", "60");
    let max = device.read(sys, "voltage_max").unwrap();
    assert_eq!(max.as_quantity().unwrap().magnitude(), 60.0);
    assert!(matches!(
        device.write(sys, "get_voltage", Quantity::parse("1 V").unwrap()),
        Err(ScpiError::NotSupported { .. })
    ));
}

#[test]
fn test_channel_independence() {
    let (mut device, mock) = setup();
    let source = device.mount(&generator()).unwrap();
    let channels = source.as_channels().unwrap().clone();
    assert_eq!(channels.channel_ids(), vec![1, 2, 3, 4]);

    let ids: Vec<_> = channels.iter().map(|(_, id)| id).collect();
    for (i, a) in ids.iter().enumerate() {
        for b in &ids[i + 1..] {
            assert_ne!(a, b);
        }
    }

    for (channel, id) in channels.iter() {
        let keys = device.resolve(id).unwrap().keys().clone();
        assert_eq!(keys.get("source"), Some(&i64::from(channel)));
        device
            .write(id, "frequency", Quantity::parse("1 kHz").unwrap())
            .unwrap();
    }
    assert_eq!(
        mock.writes(),
        vec![
            "source1:frequency 1000",
            "source2:frequency 1000",
            "source3:frequency 1000",
            "source4:frequency 1000",
        ]
    );
    assert!(matches!(
        channels.channel(5),
        Err(ScpiError::ChannelNotFound { channel: 5, .. })
    ));
}

#[test]
fn test_nested_index_propagation() {
    let (mut device, mock) = setup();
    device.mount(&generator()).unwrap();

    let am = device.find("source[3].am[1]").unwrap();
    let mut instance = device.instance(am).unwrap();
    assert_eq!(instance.channel_index().unwrap(), Some(1));
    let keys = instance.keys().unwrap();
    assert_eq!(keys.get("source"), Some(&3));
    assert_eq!(keys.get("am"), Some(&1));

    mock.push_reply("25");
    instance.read("frequency").unwrap();
    assert_eq!(mock.queries(), vec!["source3:am1:frequency?"]);
}

#[test]
fn test_parent_lifetime() {
    let (mut device, mock) = setup();
    device.mount(&generator()).unwrap();
    let nested = device.find("source[2].am[2]").unwrap();
    let channel = device.find("source[2]").unwrap();

    device.detach(ParentRef::Device, "source").unwrap();

    assert!(matches!(
        device.read(nested, "frequency"),
        Err(ScpiError::ParentLifetime(_))
    ));
    assert!(matches!(
        device.write(channel, "shape", "square"),
        Err(ScpiError::ParentLifetime(_))
    ));
    assert!(matches!(
        device.instance(nested),
        Err(ScpiError::ParentLifetime(_))
    ));
    assert!(mock.call_log().is_empty());
    assert_eq!(device.live_instances(), 0);
}

#[test]
fn test_detach_nested_keeps_parent() {
    let (mut device, _mock) = setup();
    device.mount(&generator()).unwrap();
    let channel = device.find("source[1]").unwrap();
    let nested = device.find("source[1].am[1]").unwrap();

    device.detach(ParentRef::Subsystem(channel), "am").unwrap();
    assert!(device.resolve(channel).is_ok());
    assert!(matches!(
        device.resolve(nested),
        Err(ScpiError::ParentLifetime(_))
    ));
}

#[test]
fn test_fan_out_over_collection() {
    let (mut device, mock) = setup();
    let source = device
        .attach(
            Target::Device,
            &generator(),
            InstanceOptions::default().channels(2),
        )
        .unwrap()
        .remove(0);
    let collection = source.as_channels().unwrap().clone();

    let sweep = SubsystemTemplate::build(&Prototype::new("sweep").command(
        CommandDefinition::new(
            "points",
            "source{source}:sweep:points",
            ConverterKind::Numeric(NumericType::Integer),
        ),
    ))
    .unwrap();
    let attached = device
        .attach(Target::Collection(collection), &sweep, InstanceOptions::default())
        .unwrap();
    assert_eq!(attached.len(), 2);

    for (i, attachment) in attached.iter().enumerate() {
        let id = attachment.single().unwrap();
        device.write(id, "points", 100 + i as i64).unwrap();
    }
    assert_eq!(
        mock.writes(),
        vec!["source1:sweep:points 100", "source2:sweep:points 101"]
    );
    assert!(device.find("source[2].sweep").is_ok());
}

#[test]
fn test_unfilled_placeholder_sends_nothing() {
    let (mut device, mock) = setup();
    let orphan = SubsystemTemplate::build(&Prototype::new("trigger").command(
        CommandDefinition::new(
            "delay",
            "trigger{trigger}:delay",
            ConverterKind::Numeric(NumericType::Float),
        ),
    ))
    .unwrap();
    let id = device.mount(&orphan).unwrap().single().unwrap();

    assert!(matches!(
        device.read(id, "delay"),
        Err(ScpiError::Substitution { .. })
    ));
    assert!(matches!(
        device.write(id, "delay", 0.5),
        Err(ScpiError::Substitution { .. })
    ));
    assert!(mock.call_log().is_empty());
}

#[test]
fn test_split_write_commands() {
    let (mut device, mock) = setup();
    let output = SubsystemTemplate::build(
        &Prototype::new("output").command(
            CommandDefinition::new("enabled", "output:state", ConverterKind::Boolean)
                .split_write("output:start", "output:stop"),
        ),
    )
    .unwrap();
    let id = device.mount(&output).unwrap().single().unwrap();

    device.write(id, "set_enabled", true).unwrap();
    device.write(id, "set_enabled", 0).unwrap();
    assert_eq!(mock.writes(), vec!["output:start", "output:stop"]);

    mock.push_reply("1");
    assert_eq!(device.read(id, "get_enabled").unwrap(), Value::Bool(true));
}

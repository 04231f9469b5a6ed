// Artifact transport-string round trips and elapsed-time formatting.

use voicememo::{format_elapsed, EncodingChoice, RecordingArtifact};

fn sample_artifact() -> RecordingArtifact {
    RecordingArtifact {
        encoding: EncodingChoice::from("audio/wav;codecs=pcm-s16le"),
        bytes: vec![0x52, 0x49, 0x46, 0x46, 0x00, 0xFF, 0x7E, 0x01],
        duration_seconds: 42,
    }
}

#[test]
fn transport_round_trip_is_byte_exact() {
    let original = sample_artifact();
    let transport = original.to_transport_string();

    let decoded = RecordingArtifact::from_transport_string(&transport).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn transport_string_is_self_describing() {
    let transport = sample_artifact().to_transport_string();

    assert!(transport.starts_with("data:audio/wav;codecs=pcm-s16le;duration=42;base64,"));
}

#[test]
fn empty_artifact_survives_the_round_trip() {
    let original = RecordingArtifact {
        encoding: EncodingChoice::from("audio/wav"),
        bytes: Vec::new(),
        duration_seconds: 0,
    };
    assert!(original.is_empty());

    let decoded =
        RecordingArtifact::from_transport_string(&original.to_transport_string()).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn duration_defaults_to_zero_when_absent() {
    let decoded = RecordingArtifact::from_transport_string("data:audio/wav;base64,AAEC").unwrap();

    assert_eq!(decoded.duration_seconds, 0);
    assert_eq!(decoded.encoding.as_str(), "audio/wav");
    assert_eq!(decoded.bytes, vec![0x00, 0x01, 0x02]);
}

#[test]
fn malformed_transport_strings_are_rejected() {
    assert!(RecordingArtifact::from_transport_string("").is_err());
    assert!(RecordingArtifact::from_transport_string("audio/wav;base64,AAEC").is_err());
    assert!(RecordingArtifact::from_transport_string("data:audio/wav").is_err());
    assert!(RecordingArtifact::from_transport_string("data:audio/wav;base64,!!!").is_err());
    assert!(
        RecordingArtifact::from_transport_string("data:audio/wav;duration=abc;base64,AAEC")
            .is_err()
    );
}

#[test]
fn elapsed_formats_as_minutes_and_padded_seconds() {
    assert_eq!(format_elapsed(0), "0:00");
    assert_eq!(format_elapsed(5), "0:05");
    assert_eq!(format_elapsed(59), "0:59");
    assert_eq!(format_elapsed(60), "1:00");
    assert_eq!(format_elapsed(65), "1:05");
    assert_eq!(format_elapsed(600), "10:00");
    assert_eq!(format_elapsed(3725), "62:05");
}

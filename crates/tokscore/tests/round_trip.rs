//! End-to-end: MIDI bytes -> timeline -> tokens -> timeline -> tokens.

use pretty_assertions::assert_eq;
use std::io::Write;
use tokscore::preprocess::{remove_redundant_pedals, resolve_pedal};
use tokscore::{
    decode, encode, jitter_velocity, scale_tempo, timeline_from_bytes, timeline_to_smf_bytes,
    transpose, validate_tokens, DecodeOptions, Event, Ratio, Symbol, Timeline, TokenSequence,
    VocabConfig, Vocabulary,
};

/// Format 1, 480 ticks per beat: a tempo track (120 BPM, then 90 BPM from
/// beat 4) and a piano part with a chord, a pedalled phrase and a
/// re-struck note.
fn piano_midi() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"MThd");
    buf.extend_from_slice(&6u32.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.extend_from_slice(&2u16.to_be_bytes());
    buf.extend_from_slice(&480u16.to_be_bytes());

    let mut tempo = Vec::new();
    tempo.extend_from_slice(&[0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]); // 500000
    tempo.extend_from_slice(&[0x8F, 0x00, 0xFF, 0x51, 0x03, 0x0A, 0x2C, 0x2B]); // tick 1920: 666667
    tempo.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
    buf.extend_from_slice(b"MTrk");
    buf.extend_from_slice(&(tempo.len() as u32).to_be_bytes());
    buf.extend_from_slice(&tempo);

    let mut piano = Vec::new();
    piano.extend_from_slice(&[0x00, 0xC0, 0x00]);
    // C major chord, one beat
    piano.extend_from_slice(&[0x00, 0x90, 60, 96]);
    piano.extend_from_slice(&[0x00, 0x90, 64, 80]);
    piano.extend_from_slice(&[0x00, 0x90, 67, 72]);
    piano.extend_from_slice(&[0x83, 0x60, 0x80, 60, 0]);
    piano.extend_from_slice(&[0x00, 0x80, 64, 0]);
    piano.extend_from_slice(&[0x00, 0x80, 67, 0]);
    // Pedal down, short melody notes, pedal up after two beats
    piano.extend_from_slice(&[0x00, 0xB0, 64, 127]);
    piano.extend_from_slice(&[0x00, 0x90, 72, 88]);
    piano.extend_from_slice(&[0x81, 0x70, 0x90, 72, 0]); // 240 ticks
    piano.extend_from_slice(&[0x00, 0x90, 74, 88]);
    piano.extend_from_slice(&[0x81, 0x70, 0x80, 74, 0]);
    piano.extend_from_slice(&[0x83, 0x60, 0xB0, 64, 0]);
    // Re-struck E across the tempo change
    piano.extend_from_slice(&[0x00, 0x90, 76, 100]);
    piano.extend_from_slice(&[0x83, 0x60, 0x90, 76, 60]);
    piano.extend_from_slice(&[0x00, 0x80, 76, 0]);
    piano.extend_from_slice(&[0x83, 0x60, 0x80, 76, 0]);
    piano.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
    buf.extend_from_slice(b"MTrk");
    buf.extend_from_slice(&(piano.len() as u32).to_be_bytes());
    buf.extend_from_slice(&piano);

    buf
}

fn assert_stable(timeline: &Timeline, vocab: &Vocabulary) -> TokenSequence {
    let first = encode(timeline, vocab).unwrap();
    validate_tokens(&first, vocab).unwrap();

    let decoded = decode(&first, vocab, &DecodeOptions::from_vocab(vocab)).unwrap();
    assert!(decoded.warnings.is_empty());
    assert!(!decoded.truncated);

    let second = encode(&decoded.timeline, vocab).unwrap();
    assert_eq!(second, first);
    first
}

#[test]
fn midi_file_round_trip() {
    let vocab = Vocabulary::bundled().unwrap();
    let timeline = timeline_from_bytes(&piano_midi()).unwrap();

    // 120 BPM for four beats, then 90 BPM: tick 2400 lands at 2000 + 667 ms.
    assert_eq!(timeline.end_time(), 2_667);
    assert_eq!(timeline.notes(vocab.overlap_policy()).len(), 7);

    assert_stable(&timeline, &vocab);
}

#[test]
fn preprocessed_timeline_round_trip() {
    let vocab = Vocabulary::bundled().unwrap();
    let timeline = timeline_from_bytes(&piano_midi()).unwrap();
    let cleaned = remove_redundant_pedals(&resolve_pedal(&timeline));

    // The pedal sustained both melody notes to its release at 1500 ms.
    let melody: Vec<(u64, u64)> = cleaned
        .notes(vocab.overlap_policy())
        .iter()
        .filter(|n| n.pitch == 72 || n.pitch == 74)
        .map(|n| (n.start, n.end))
        .collect();
    assert_eq!(melody, vec![(500, 1_500), (750, 1_500)]);

    assert_stable(&cleaned, &vocab);
}

#[test]
fn augmented_timelines_round_trip() {
    let vocab = Vocabulary::bundled().unwrap();
    let timeline = timeline_from_bytes(&piano_midi()).unwrap();

    let up = transpose(&timeline, &vocab, 7).unwrap();
    assert_stable(&up, &vocab);

    let jittered = jitter_velocity(&timeline, &vocab, 12, 0xC0FFEE);
    assert_stable(&jittered, &vocab);

    let slower = scale_tempo(&timeline, Ratio::new(5, 4).unwrap()).unwrap();
    assert_stable(&slower, &vocab);
}

#[test]
fn decoded_tokens_write_a_playable_file() {
    let vocab = Vocabulary::bundled().unwrap();
    let timeline = timeline_from_bytes(&piano_midi()).unwrap();
    let tokens = encode(&timeline, &vocab).unwrap();

    let decoded = decode(&tokens, &vocab, &DecodeOptions::strict()).unwrap();
    let bytes = timeline_to_smf_bytes(&decoded.timeline).unwrap();
    let reread = timeline_from_bytes(&bytes).unwrap();

    assert_eq!(reread, decoded.timeline);
    assert_eq!(encode(&reread, &vocab).unwrap(), tokens);

    // Both tempos of the source file, snapped to their buckets.
    let tempos = reread
        .iter()
        .filter(|e| matches!(e, Event::TempoChange { .. }))
        .count();
    assert_eq!(tempos, 2);
}

#[test]
fn tokens_cross_process_boundary_as_json() {
    let vocab = Vocabulary::bundled().unwrap();
    let timeline = timeline_from_bytes(&piano_midi()).unwrap();
    let tokens = encode(&timeline, &vocab).unwrap();

    let json = tokens.to_json().unwrap();
    let received = TokenSequence::from_json(&json).unwrap();
    assert_eq!(received, tokens);

    let other = Vocabulary::bundled().unwrap();
    assert_eq!(other.fingerprint(), vocab.fingerprint());
    let a = decode(&received, &other, &DecodeOptions::strict()).unwrap();
    let b = decode(&tokens, &vocab, &DecodeOptions::strict()).unwrap();
    assert_eq!(a.timeline.content_hash(), b.timeline.content_hash());
}

#[test]
fn vocabulary_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
version = 1
name = "coarse"

[time]
resolution_ms = 50
max_shift_ms = 1000

[velocity]
min = 1
max = 127
buckets = 4

[pitch]
min = 21
max = 108

[decode]
policy = "lenient"
"#
    )
    .unwrap();

    let config = VocabConfig::load_from_file(file.path()).unwrap();
    let vocab = Vocabulary::load(&config).unwrap();
    assert_eq!(vocab.name(), "coarse");
    assert_eq!(vocab.velocities(), &[1, 43, 85, 127]);
    assert_eq!(DecodeOptions::from_vocab(&vocab), DecodeOptions::lenient());

    let timeline = timeline_from_bytes(&piano_midi()).unwrap();
    let tokens = assert_stable(&timeline, &vocab);
    let bundled = encode(&timeline, &Vocabulary::bundled().unwrap()).unwrap();
    assert_ne!(vocab.fingerprint(), Vocabulary::bundled().unwrap().fingerprint());
    assert_ne!(tokens, bundled);
}

#[test]
fn lenient_decode_of_model_output() {
    let vocab = Vocabulary::bundled().unwrap();
    let timeline = timeline_from_bytes(&piano_midi()).unwrap();
    let mut ids = encode(&timeline, &vocab).unwrap().as_ids();

    // Simulate a sampled sequence: a stray velocity in the middle and no END.
    let stray = vocab.index_of(Symbol::Velocity(vocab.velocities()[0])).unwrap();
    ids.insert(5, stray.id());
    ids.pop();

    let tokens = TokenSequence::from_ids(&ids);
    assert!(decode(&tokens, &vocab, &DecodeOptions::strict()).is_err());

    let decoded = decode(&tokens, &vocab, &DecodeOptions::lenient()).unwrap();
    assert!(decoded.truncated);
    assert!(!decoded.warnings.is_empty());
    assert!(encode(&decoded.timeline, &vocab).is_ok());
}

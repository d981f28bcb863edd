use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tonelink_core::{Decoder, Encoder, EncoderOptions};

fn transmit(opt: &EncoderOptions, payload: &[u8]) -> Vec<f32> {
    let mut encoder = Encoder::new(opt).expect("Failed to create encoder");
    encoder.set_payload(payload);
    let mut samples = Vec::new();
    let mut buf = vec![0.0f32; 4096];
    loop {
        let n = encoder.emit(&mut buf);
        samples.extend_from_slice(&buf[..n]);
        if n < buf.len() {
            break;
        }
    }
    samples
}

fn receive(opt: &EncoderOptions, samples: &[f32]) -> Vec<u8> {
    let mut decoder = Decoder::new(opt).expect("Failed to create decoder");
    for chunk in samples.chunks(3000) {
        decoder.recv(chunk);
    }
    decoder.flush();
    let mut decoded = vec![0u8; decoder.available()];
    let n = decoder.read(&mut decoded);
    decoded.truncate(n);
    decoded
}

fn add_noise(samples: &mut [f32], sigma: f32, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sigma).expect("Invalid noise parameters");
    for s in samples.iter_mut() {
        *s += normal.sample(&mut rng);
    }
}

#[test]
fn test_detect_frame_between_silence() {
    let opt = EncoderOptions::modem();
    let payload = b"Hello, Audio Modem!".to_vec();

    let mut samples = vec![0.0; 4000];
    samples.extend(transmit(&opt, &payload));
    samples.extend_from_slice(&vec![0.0; 4000]);

    assert_eq!(receive(&opt, &samples), payload);
}

#[test]
fn test_detect_frame_with_noise() {
    for opt in [
        EncoderOptions::modem(),
        EncoderOptions::robust(),
        EncoderOptions::ofdm(),
    ] {
        let payload: Vec<u8> = (0..200).map(|i| (i * 13 + 5) as u8).collect();

        let mut samples = vec![0.0; 6000];
        samples.extend(transmit(&opt, &payload));
        samples.extend_from_slice(&vec![0.0; 2000]);
        add_noise(&mut samples, 0.002, 42);

        assert_eq!(receive(&opt, &samples), payload, "profile with {:?}", opt.mod_scheme);
    }
}

#[test]
fn test_detect_quiet_signal() {
    let opt = EncoderOptions::robust();
    let payload = b"whisper".to_vec();
    let samples: Vec<f32> = transmit(&opt, &payload).iter().map(|s| s * 0.05).collect();

    assert_eq!(receive(&opt, &samples), payload);
}

#[test]
fn test_detect_inverted_signal() {
    // a polarity flip is a 180 degree carrier rotation; the preamble gain absorbs it
    let opt = EncoderOptions::modem();
    let payload = b"upside down".to_vec();
    let samples: Vec<f32> = transmit(&opt, &payload).iter().map(|s| -s).collect();

    assert_eq!(receive(&opt, &samples), payload);
}

#[test]
fn test_detect_consecutive_messages() {
    let opt = EncoderOptions::ofdm().with_sample_rate(48000);
    let first = b"first message".to_vec();
    let second = b"and the second one".to_vec();

    let mut samples = transmit(&opt, &first);
    samples.extend_from_slice(&vec![0.0; 1234]);
    samples.extend(transmit(&opt, &second));

    let mut expected = first.clone();
    expected.extend_from_slice(&second);
    assert_eq!(receive(&opt, &samples), expected);
}

#[test]
fn test_noise_alone_decodes_nothing() {
    let opt = EncoderOptions::modem();
    let mut samples = vec![0.0; 40000];
    add_noise(&mut samples, 0.1, 7);

    assert!(receive(&opt, &samples).is_empty());
}

use crate::error::GenerationError;
use crate::sampling::SamplingError;

#[test]
fn test_display_messages() {
    let e = GenerationError::Configuration("top_p must be in (0, 1]".into());
    assert!(e.to_string().starts_with("configuration error"));

    let e = GenerationError::ModelLoad("missing model.mpk".into());
    assert!(e.to_string().contains("model load error"));

    let e = GenerationError::Decode {
        tokens: 12,
        message: "bad".into(),
    };
    assert!(e.to_string().contains("after 12 tokens"));

    let e = GenerationError::InvalidState {
        state: "Initializing",
        expected: "Stepping",
    };
    assert!(e.to_string().contains("Initializing"));
}

#[test]
fn test_sampling_error_converts() {
    fn sample() -> crate::error::Result<usize> {
        Err(SamplingError::InvalidDistribution("all -inf".into()))?
    }
    match sample() {
        Err(GenerationError::Sampling(SamplingError::InvalidDistribution(msg))) => {
            assert_eq!(msg, "all -inf")
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_only_seed_encoding_is_recoverable() {
    assert!(GenerationError::SeedEncoding("garbage".into()).is_recoverable());
    assert!(!GenerationError::Prediction("oops".into()).is_recoverable());
    assert!(!GenerationError::ModelLoad("oops".into()).is_recoverable());
    assert!(
        !GenerationError::Sampling(SamplingError::InvalidParameter("t".into())).is_recoverable()
    );
}

#[test]
fn test_io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let e: GenerationError = io.into();
    assert!(matches!(e, GenerationError::Io(_)));
}

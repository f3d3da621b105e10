mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use common::MB;
use media_fix::common::process::ProcessPool;
use media_fix::downloader::error::CompressionError;
use media_fix::post_process::{
    CompressorConfig, DEFAULT_CEILING_BYTES, VideoCompressor, compute_video_bitrate,
};

#[test]
fn test_bitrate_matches_reference() {
    let ceiling = DEFAULT_CEILING_BYTES;
    let bitrate = compute_video_bitrate(ceiling, 600.0, 0.95, 128_000.0).unwrap();

    let expected = (49.5 * 1024.0 * 1024.0 * 0.95 * 8.0) / 600.0 - 128_000.0;
    assert!((bitrate - expected).abs() < 1.0, "{} vs {}", bitrate, expected);
    // 约 529.5 kbps
    assert!((bitrate - 529_457.0).abs() < 100.0);
}

#[test]
fn test_bitrate_rejects_long_media() {
    // 约 3082 秒时总码率刚好等于音频码率
    let err = compute_video_bitrate(DEFAULT_CEILING_BYTES, 4000.0, 0.95, 128_000.0).unwrap_err();
    match err {
        CompressionError::BitrateTooLow { bitrate_bps } => assert!(bitrate_bps <= 0.0),
        other => panic!("意外的错误: {:?}", other),
    }

    assert!(matches!(
        compute_video_bitrate(DEFAULT_CEILING_BYTES, 0.0, 0.95, 128_000.0),
        Err(CompressionError::DurationProbe(_))
    ));
}

#[tokio::test]
async fn test_small_input_is_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("small.mp4");
    std::fs::write(&input, vec![0u8; 2048]).unwrap();

    let config = CompressorConfig {
        ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
        ffprobe_path: "/nonexistent/ffprobe".to_string(),
        ..CompressorConfig::default()
    };
    let compressor = VideoCompressor::new(ProcessPool::new(1), config);

    for _ in 0..2 {
        let (path, compressed) = compressor
            .compress_if_needed(&input, MB, None)
            .await
            .unwrap();
        assert_eq!(path, input);
        assert!(!compressed);
    }

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(std::fs::read(&input).unwrap().len(), 2048);
}

#[tokio::test]
async fn test_missing_input() {
    let compressor = VideoCompressor::new(ProcessPool::new(1), CompressorConfig::default());
    let err = compressor
        .compress_if_needed(std::path::Path::new("/nonexistent/in.mp4"), MB, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CompressionError::InputNotFound(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_two_pass_reports_overall_progress() {
    let tools = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("big.mp4");
    std::fs::File::create(&input).unwrap().set_len(60 * MB).unwrap();

    let config = CompressorConfig {
        ffmpeg_path: common::fake_encoder(tools.path(), 1024 * 1024)
            .to_string_lossy()
            .into_owned(),
        ffprobe_path: common::fake_ffprobe(tools.path(), 600.0)
            .to_string_lossy()
            .into_owned(),
        ..CompressorConfig::default()
    };
    let compressor = VideoCompressor::new(ProcessPool::new(2), config);

    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);
    let on_progress = move |p: f64| sink.lock().push(p);

    let (output, compressed) = compressor
        .compress_if_needed(&input, DEFAULT_CEILING_BYTES, Some(&on_progress))
        .await
        .unwrap();

    assert!(compressed);
    assert_eq!(output, work.path().join("big_compressed.mp4"));
    let size = std::fs::metadata(&output).unwrap().len();
    assert!(size > 0 && size <= DEFAULT_CEILING_BYTES);

    let reported = reported.lock().clone();
    assert!(reported.iter().all(|p| (0.0..=100.0).contains(p)));
    assert!(reported.windows(2).all(|w| w[0] <= w[1]), "{:?}", reported);
    // 第一遍在一半时报告 25，结束时 50；第二遍一半时 75
    assert!(reported.contains(&25.0));
    assert!(reported.contains(&50.0));
    assert!(reported.contains(&75.0));
    assert_eq!(reported.last().copied(), Some(100.0));
}

#[cfg(unix)]
#[tokio::test]
async fn test_encoder_failure_removes_partial_output() {
    let tools = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("big.mp4");
    std::fs::File::create(&input).unwrap().set_len(60 * MB).unwrap();

    let config = CompressorConfig {
        ffmpeg_path: common::failing_encoder(tools.path(), 2)
            .to_string_lossy()
            .into_owned(),
        ffprobe_path: common::fake_ffprobe(tools.path(), 600.0)
            .to_string_lossy()
            .into_owned(),
        ..CompressorConfig::default()
    };
    let compressor = VideoCompressor::new(ProcessPool::new(1), config);

    let err = compressor
        .compress_if_needed(&input, DEFAULT_CEILING_BYTES, None)
        .await
        .unwrap_err();
    match err {
        CompressionError::Encoder { pass, diagnostics } => {
            assert_eq!(pass, 2);
            assert!(diagnostics.contains("encoder exploded"));
        }
        other => panic!("意外的错误: {:?}", other),
    }
    assert!(!work.path().join("big_compressed.mp4").exists());
    assert!(input.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_too_long_media_fails_without_encoding() {
    let tools = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("long.mp4");
    std::fs::File::create(&input).unwrap().set_len(60 * MB).unwrap();

    let config = CompressorConfig {
        ffmpeg_path: common::failing_encoder(tools.path(), 1)
            .to_string_lossy()
            .into_owned(),
        ffprobe_path: common::fake_ffprobe(tools.path(), 7200.0)
            .to_string_lossy()
            .into_owned(),
        ..CompressorConfig::default()
    };
    let compressor = VideoCompressor::new(ProcessPool::new(1), config);

    let err = compressor
        .compress_if_needed(&input, DEFAULT_CEILING_BYTES, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CompressionError::BitrateTooLow { .. }));
    assert!(!work.path().join("long_compressed.mp4").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_output_over_ceiling_is_rejected() {
    let tools = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("big.mp4");
    std::fs::File::create(&input).unwrap().set_len(3 * MB).unwrap();

    // 编码器无视目标码率，输出比上限还大
    let config = CompressorConfig {
        ffmpeg_path: common::fake_encoder(tools.path(), 3 * MB)
            .to_string_lossy()
            .into_owned(),
        ffprobe_path: common::fake_ffprobe(tools.path(), 10.0)
            .to_string_lossy()
            .into_owned(),
        ..CompressorConfig::default()
    };
    let compressor = VideoCompressor::new(ProcessPool::new(1), config);

    let err = compressor
        .compress_if_needed(&input, 2 * MB, None)
        .await
        .unwrap_err();
    match err {
        CompressionError::OverCeiling { size, ceiling } => {
            assert_eq!(size, 3 * MB);
            assert_eq!(ceiling, 2 * MB);
        }
        other => panic!("意外的错误: {:?}", other),
    }
    assert!(!work.path().join("big_compressed.mp4").exists());
    assert!(input.exists());
}

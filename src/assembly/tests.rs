use super::*;
use crate::test_helpers::{FakeMediaTool, ToolCall, test_config, write_source};

struct Harness {
    config: Arc<Config>,
    tool: Arc<FakeMediaTool>,
    assembler: Assembler,
    events: broadcast::Receiver<Event>,
    _dir: tempfile::TempDir,
}

fn harness(tweak: impl FnOnce(&mut Config)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    tweak(&mut config);
    let config = Arc::new(config);
    let tool = Arc::new(FakeMediaTool::new());
    let (tx, events) = broadcast::channel(256);
    let assembler = Assembler::new(config.clone(), tool.clone(), tx);
    Harness {
        config,
        tool,
        assembler,
        events,
        _dir: dir,
    }
}

/// `count` normalized-looking files `A|`, `B|`, ... with ascending mtimes
async fn sources(h: &Harness, count: usize) -> Vec<LocalFile> {
    let mut files = Vec::new();
    for i in 0..count {
        let letter = char::from(b'A' + i as u8);
        let name = format!("norm_{:04}_{letter}.mp4", i + 1);
        files.push(
            write_source(
                &h.config.paths.temp_dir,
                &name,
                format!("{letter}|").as_bytes(),
                i as u64,
            )
            .await,
        );
    }
    files
}

fn expected(count: usize) -> String {
    (0..count)
        .map(|i| format!("{}|", char::from(b'A' + i as u8)))
        .collect()
}

async fn merge(h: &Harness, files: &[LocalFile]) -> Result<FinalArtifact> {
    h.assembler
        .merge(files, &h.config.paths.merged_dir, &CancellationToken::new())
        .await
}

fn copy_calls(tool: &FakeMediaTool) -> usize {
    tool.calls()
        .iter()
        .filter(|c| matches!(c, ToolCall::ConcatCopy { .. }))
        .count()
}

fn pair_calls(tool: &FakeMediaTool) -> usize {
    tool.calls()
        .iter()
        .filter(|c| matches!(c, ToolCall::ConcatPair { .. }))
        .count()
}

fn mp4s_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|e| e == "mp4"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn batches_cover_every_index_once() {
    assert_eq!(plan_batches(10, 10), vec![0..10]);
    assert_eq!(plan_batches(11, 10), vec![0..10, 10..11]);
    assert_eq!(plan_batches(3, 1).len(), 3);
    let ranges = plan_batches(47, 6);
    assert_eq!(ranges.len(), 47usize.div_ceil(6));
    assert_eq!(ranges.iter().map(|r| r.len()).sum::<usize>(), 47);
}

#[test]
fn pair_rounds_shrink_to_one() {
    assert_eq!(
        plan_pair_round(4),
        PairRound {
            pairs: vec![(0, 1), (2, 3)],
            carry: None
        }
    );
    let mut n = 9;
    let mut rounds = 0;
    while n > 1 {
        n = plan_pair_round(n).outputs();
        rounds += 1;
    }
    assert_eq!(rounds, 4);
}

#[tokio::test]
async fn inputs_are_merged_in_mtime_order() {
    let h = harness(|_| {});
    let dir = &h.config.paths.temp_dir;
    let late = write_source(dir, "late.mp4", b"C|", 30).await;
    let early = write_source(dir, "early.mp4", b"A|", 10).await;
    let middle = write_source(dir, "middle.mp4", b"B|", 20).await;

    let artifact = merge(&h, &[late, early, middle]).await.unwrap();

    assert_eq!(tokio::fs::read(&artifact.path).await.unwrap(), b"A|B|C|");
    assert_eq!(artifact.source_count, 3);
    assert_eq!(artifact.size, 6);
    assert!(artifact.path.starts_with(&h.config.paths.merged_dir));
}

#[tokio::test]
async fn equal_mtimes_keep_input_order() {
    let h = harness(|_| {});
    let dir = &h.config.paths.temp_dir;
    let x = write_source(dir, "x.mp4", b"X|", 5).await;
    let y = write_source(dir, "y.mp4", b"Y|", 5).await;

    let artifact = merge(&h, &[y, x]).await.unwrap();
    assert_eq!(tokio::fs::read(&artifact.path).await.unwrap(), b"Y|X|");
}

#[tokio::test]
async fn single_input_is_copied() {
    let h = harness(|_| {});
    let files = sources(&h, 1).await;

    let artifact = merge(&h, &files).await.unwrap();

    assert_eq!(tokio::fs::read(&artifact.path).await.unwrap(), b"A|");
    assert!(files[0].path.exists());
    assert_eq!(copy_calls(&h.tool), 1);
}

#[tokio::test]
async fn empty_input_is_rejected() {
    let h = harness(|_| {});
    let err = merge(&h, &[]).await.unwrap_err();
    assert!(matches!(err, Error::Media(MediaError::NoInputs)));
}

#[tokio::test]
async fn large_inputs_are_batched() {
    let mut h = harness(|c| c.assembly.batch_size = 3);
    let files = sources(&h, 7).await;

    let artifact = merge(&h, &files).await.unwrap();

    assert_eq!(
        tokio::fs::read_to_string(&artifact.path).await.unwrap(),
        expected(7)
    );
    // three level-0 batches, then one final merge of the intermediates
    assert_eq!(copy_calls(&h.tool), 4);
    assert_eq!(pair_calls(&h.tool), 0);

    let mut batch_events = Vec::new();
    let mut assembled = 0;
    while let Ok(event) = h.events.try_recv() {
        match event {
            Event::BatchMerged {
                level,
                index,
                total,
            } => batch_events.push((level, index, total)),
            Event::Assembled { .. } => assembled += 1,
            _ => {}
        }
    }
    assert_eq!(batch_events, vec![(0, 0, 3), (0, 1, 3), (0, 2, 3)]);
    assert_eq!(assembled, 1);
}

#[tokio::test]
async fn multi_level_batching_keeps_order_and_cleans_up() {
    let h = harness(|c| c.assembly.batch_size = 2);
    let files = sources(&h, 9).await;

    let artifact = merge(&h, &files).await.unwrap();

    assert_eq!(
        tokio::fs::read_to_string(&artifact.path).await.unwrap(),
        expected(9)
    );
    assert!(!h.config.paths.temp_dir.join(SCRATCH_DIR).exists());
    assert!(files.iter().all(|f| f.path.exists()));
    assert_eq!(mp4s_in(&h.config.paths.merged_dir).len(), 1);
}

#[tokio::test]
async fn copy_failure_falls_back_to_pairwise() {
    let mut h = harness(|_| {});
    h.tool.fail_copy();
    let files = sources(&h, 5).await;

    let artifact = merge(&h, &files).await.unwrap();

    assert_eq!(
        tokio::fs::read_to_string(&artifact.path).await.unwrap(),
        expected(5)
    );
    // 5 -> 3 -> 2 -> 1
    assert_eq!(pair_calls(&h.tool), 4);
    assert!(!h.config.paths.temp_dir.join(SCRATCH_DIR).exists());
    assert!(files.iter().all(|f| f.path.exists()));

    let fallbacks: Vec<usize> = std::iter::from_fn(|| h.events.try_recv().ok())
        .filter_map(|e| match e {
            Event::MergeFallback { inputs } => Some(inputs),
            _ => None,
        })
        .collect();
    assert_eq!(fallbacks, vec![5]);
}

#[tokio::test]
async fn pairwise_never_passes_output_as_input() {
    let h = harness(|_| {});
    h.tool.fail_copy();
    let files = sources(&h, 4).await;

    let artifact = merge(&h, &files).await.unwrap();

    let pairs: Vec<ToolCall> = h
        .tool
        .calls()
        .into_iter()
        .filter(|c| matches!(c, ToolCall::ConcatPair { .. }))
        .collect();
    assert_eq!(pairs.len(), 3);
    for call in &pairs[..2] {
        if let ToolCall::ConcatPair { output, .. } = call {
            assert_ne!(output, &artifact.path);
        }
    }
    match &pairs[2] {
        ToolCall::ConcatPair { output, .. } => assert_eq!(output, &artifact.path),
        other => panic!("unexpected call {other:?}"),
    }
}

#[tokio::test]
async fn fallback_applies_per_batch() {
    let mut h = harness(|c| c.assembly.batch_size = 3);
    h.tool.fail_copy_above(2);
    let files = sources(&h, 6).await;

    let artifact = merge(&h, &files).await.unwrap();

    assert_eq!(
        tokio::fs::read_to_string(&artifact.path).await.unwrap(),
        expected(6)
    );
    // each 3-file batch needs two pair merges; the final 2-file group copies fine
    assert_eq!(pair_calls(&h.tool), 4);
    let fallbacks = std::iter::from_fn(|| h.events.try_recv().ok())
        .filter(|e| matches!(e, Event::MergeFallback { .. }))
        .count();
    assert_eq!(fallbacks, 2);
}

#[tokio::test]
async fn total_failure_leaves_no_output() {
    let h = harness(|_| {});
    h.tool.fail_copy();
    h.tool.set_pair_fails(true);
    let files = sources(&h, 3).await;

    let err = merge(&h, &files).await.unwrap_err();

    match err {
        Error::Media(MediaError::ConcatFailed { inputs, stderr, .. }) => {
            assert_eq!(inputs, 3);
            assert!(stderr.contains("Error while filtering"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(mp4s_in(&h.config.paths.merged_dir).is_empty());
    assert!(!h.config.paths.temp_dir.join(SCRATCH_DIR).exists());
    assert!(files.iter().all(|f| f.path.exists()));
}

#[tokio::test]
async fn single_input_copy_failure_is_concat_failed() {
    let h = harness(|_| {});
    h.tool.fail_copy();
    let files = sources(&h, 1).await;

    let err = merge(&h, &files).await.unwrap_err();
    assert!(matches!(err, Error::Media(MediaError::ConcatFailed { .. })));
    assert_eq!(pair_calls(&h.tool), 0);
    assert!(mp4s_in(&h.config.paths.merged_dir).is_empty());
}

#[tokio::test]
async fn insufficient_space_fails_before_any_work() {
    let h = harness(|c| c.assembly.min_free_space = u64::MAX);
    let files = sources(&h, 2).await;

    let err = merge(&h, &files).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Media(MediaError::InsufficientSpace { .. })
    ));
    assert!(h.tool.calls().is_empty());
    assert!(mp4s_in(&h.config.paths.merged_dir).is_empty());
}

#[tokio::test]
async fn colliding_names_get_a_suffix() {
    let h = harness(|c| c.assembly.timestamp_format = "reel".into());
    let files = sources(&h, 2).await;

    let first = merge(&h, &files).await.unwrap();
    let second = merge(&h, &files).await.unwrap();

    assert_eq!(first.path.file_name().unwrap(), "reel.mp4");
    assert_eq!(second.path.file_name().unwrap(), "reel (1).mp4");
}

#[tokio::test]
async fn cancelled_merge_writes_nothing() {
    let h = harness(|_| {});
    let files = sources(&h, 3).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .assembler
        .merge(&files, &h.config.paths.merged_dir, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(h.tool.calls().is_empty());
    assert!(mp4s_in(&h.config.paths.merged_dir).is_empty());
}

//! End-to-end streaming through the slice/join pipeline.

mod common;

use common::{add_volume, slice_join, stream_to_memory, volume_value};
use proptest::prelude::*;
use strata::prelude::*;

#[test]
fn test_cube_divisions_are_z_slabs() {
    let divisions: Vec<Region> = StreamSplitter::plan(&Region::from_size([4, 4, 4]), 4).collect();
    let expected: Vec<Region> = (0..4).map(|z| Region::new([0, 0, z], [4, 4, 1])).collect();
    assert_eq!(divisions, expected);
}

#[test]
fn test_join_streaming_matches_volume() {
    let mut graph = ProcessingGraph::new();
    let pipeline = slice_join(&mut graph, &[4, 4, 4]);

    let (pixels, summary) = stream_to_memory(&mut graph, pipeline.join, 4);
    assert_eq!(summary.divisions, 4);

    let mut expected = Vec::new();
    for z in 0..4 {
        for y in 0..4 {
            for x in 0..4 {
                expected.push(volume_value(&[x, y, z]));
            }
        }
    }
    assert_eq!(pixels, expected);

    // Every slice was read once; later divisions reuse the extracted slices.
    assert_eq!(pipeline.monitor.number_of_updates(), 4);
    let regions = pipeline.monitor.updated_regions();
    for (z, region) in regions.iter().enumerate() {
        assert_eq!(region, &Region::new([0, 0, z as i64], [4, 4, 1]));
    }
}

#[test]
fn test_join_streaming_with_release_recomputes() {
    let mut graph = ProcessingGraph::new();
    let pipeline = slice_join(&mut graph, &[4, 4, 4]);
    for &extract in &pipeline.extractors {
        graph.set_release_data_flag(extract, true).unwrap();
    }

    let (pixels, _) = stream_to_memory(&mut graph, pipeline.join, 4);

    assert_eq!(pipeline.monitor.number_of_updates(), 16);
    assert_eq!(pixels[63], volume_value(&[3, 3, 3]));
    for &extract in &pipeline.extractors {
        assert!(graph.output(extract).unwrap().is_released());
    }
}

#[test]
fn test_chain_monitor_counts_divisions() {
    let mut graph = ProcessingGraph::new();
    let source = add_volume(&mut graph, &[10, 7]);
    let monitor = PipelineMonitor::new();
    let handle = monitor.handle();
    let monitor = graph.add(monitor);
    let shift = graph.add(ShiftScaleFilter::new(1.0, 1.0));
    graph.connect(source, monitor, 0).unwrap();
    graph.connect(monitor, shift, 0).unwrap();

    let (pixels, _) = stream_to_memory(&mut graph, shift, 5);
    assert_eq!(handle.number_of_updates(), 5);
    assert_eq!(pixels[0], 1.0);
    assert_eq!(pixels[69], volume_value(&[9, 6]) + 1.0);
}

#[test]
fn test_repeat_update_adds_nothing() {
    let mut graph = ProcessingGraph::new();
    let pipeline = slice_join(&mut graph, &[3, 3, 2]);

    let first = graph.update(pipeline.join).unwrap();
    // Reader and monitor run once per slice.
    assert_eq!(first.nodes_executed, 2 + 2 + 2 + 1);

    let second = graph.update(pipeline.join).unwrap();
    assert_eq!(second.nodes_executed, 0);
    assert_eq!(pipeline.monitor.number_of_updates(), 2);
}

#[test]
fn test_streaming_stays_within_memory_limit() {
    let build = || {
        let mut graph = ProcessingGraph::new();
        let source = add_volume(&mut graph, &[16, 16]);
        let shift = graph.add(ShiftScaleFilter::new(0.0, 2.0));
        graph.connect(source, shift, 0).unwrap();
        (graph, shift)
    };
    // 16 x 16 f64 is 2048 bytes per node output.
    let orchestrator = UpdateOrchestrator::new(ExecutionOptions::new().with_memory_limit(1500));

    let (mut graph, shift) = build();
    let error = orchestrator.update(&mut graph, shift).unwrap_err();
    assert!(matches!(
        error,
        PipelineError::Execution(ExecutionError::OutOfMemory { .. })
    ));

    let (mut graph, shift) = build();
    let mut sink = MemoryImageSink::new();
    let summary = StreamingWriter::new(4)
        .write(&orchestrator, &mut graph, shift, &mut sink)
        .unwrap();
    assert!(summary.peak_memory <= 1500);
    let image = sink.take_image().unwrap();
    assert_eq!(image.pixel(&[15, 15]).unwrap(), 2.0 * volume_value(&[15, 15]));
}

#[test]
fn test_raw_file_matches_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volume.raw");

    let mut graph = ProcessingGraph::new();
    let pipeline = slice_join(&mut graph, &[5, 3, 4]);
    let orchestrator = UpdateOrchestrator::default();
    let mut sink = RawFileSink::new(&path);
    StreamingWriter::new(3)
        .write(&orchestrator, &mut graph, pipeline.join, &mut sink)
        .unwrap();

    let (pixels, _) = stream_to_memory(&mut graph, pipeline.join, 1);
    let bytes = std::fs::read(&path).unwrap();
    let written: Vec<f64> = bytes
        .chunks_exact(8)
        .map(|chunk| f64::from_ne_bytes(chunk.try_into().unwrap()))
        .collect();
    assert_eq!(written, pixels);
}

#[test]
fn test_halo_at_boundary_is_rejected() {
    let mut graph = ProcessingGraph::new();
    let source = add_volume(&mut graph, &[6, 6]);
    let mean = graph.add(MeanFilter::new(2));
    graph.connect(source, mean, 0).unwrap();

    let mut sink = MemoryImageSink::new();
    let error = StreamingWriter::new(2)
        .write(&UpdateOrchestrator::default(), &mut graph, mean, &mut sink)
        .unwrap_err();
    assert!(matches!(
        error,
        PipelineError::Region(RegionError::InvalidRequestedRegion { input: 0, .. })
    ));
    assert_eq!(error.node_id(), Some(mean));
}

fn single_pass_and_streamed(size: Vec<usize>, divisions: usize) -> (Vec<f64>, Vec<f64>) {
    let build = |graph: &mut ProcessingGraph<f64>| {
        let source = add_volume(graph, &size);
        let shift = graph.add(ShiftScaleFilter::new(1.0, 0.5));
        let mean = graph.add(MeanFilter::new(1).with_boundary(BoundaryCondition::Clamp));
        graph.connect(source, shift, 0).unwrap();
        graph.connect(shift, mean, 0).unwrap();
        mean
    };

    let mut graph = ProcessingGraph::new();
    let mean = build(&mut graph);
    graph.update(mean).unwrap();
    let single = graph.output(mean).unwrap().buffer().unwrap().to_vec();

    let mut graph = ProcessingGraph::new();
    let mean = build(&mut graph);
    let (streamed, _) = stream_to_memory(&mut graph, mean, divisions);
    (single, streamed)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn streaming_equals_single_pass(
        size in proptest::collection::vec(1usize..7, 2..4),
        divisions in 1usize..8,
    ) {
        let (single, streamed) = single_pass_and_streamed(size, divisions);
        prop_assert_eq!(single, streamed);
    }
}

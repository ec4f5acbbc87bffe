//! Shared pipeline builders for integration tests.

#![allow(dead_code)]

use strata::prelude::*;

/// Value of the synthetic volume at `index`.
pub fn volume_value(index: &[i64]) -> f64 {
    index
        .iter()
        .enumerate()
        .map(|(axis, &i)| i as f64 * 10f64.powi(axis as i32))
        .sum()
}

/// A source computing [`volume_value`] over `size`.
pub fn add_volume(graph: &mut ProcessingGraph<f64>, size: &[usize]) -> NodeId {
    let info = ImageInformation::new(Region::from_size(size.to_vec()));
    graph.add(SourceNode::new(FunctionSource::new(info, volume_value)))
}

/// Reader -> monitor -> one extractor per slice of the last axis -> join.
pub struct SliceJoin {
    pub reader: NodeId,
    pub monitor: MonitorHandle,
    pub extractors: Vec<NodeId>,
    pub join: NodeId,
}

pub fn slice_join(graph: &mut ProcessingGraph<f64>, size: &[usize]) -> SliceJoin {
    let last = size.len() - 1;
    let full = Region::from_size(size.to_vec());
    let reader = add_volume(graph, size);

    let monitor = PipelineMonitor::new();
    let handle = monitor.handle();
    let monitor = graph.add(monitor);
    graph.connect(reader, monitor, 0).unwrap();

    let join = graph.add(JoinSeriesFilter::new());
    let extractors = (0..size[last])
        .map(|slice| {
            let extraction = full.with_index_at(last, slice as i64).with_size_at(last, 0);
            let extract = graph.add(ExtractFilter::new(extraction));
            graph.connect(monitor, extract, 0).unwrap();
            graph.connect(extract, join, slice).unwrap();
            extract
        })
        .collect();

    SliceJoin {
        reader,
        monitor: handle,
        extractors,
        join,
    }
}

/// Stream `terminal` into memory and return the assembled pixels.
pub fn stream_to_memory(
    graph: &mut ProcessingGraph<f64>,
    terminal: NodeId,
    divisions: usize,
) -> (Vec<f64>, StreamingSummary) {
    let orchestrator = UpdateOrchestrator::default();
    let mut sink = MemoryImageSink::new();
    let summary = StreamingWriter::new(divisions)
        .write(&orchestrator, graph, terminal, &mut sink)
        .unwrap();
    let image = sink.take_image().unwrap();
    (image.buffer().unwrap().to_vec(), summary)
}

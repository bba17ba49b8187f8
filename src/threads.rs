//! Call-stack reconstruction: decoded stack traces, and per-thread stacks
//! joined with the thread lifecycle records.

use itertools::Itertools;

use crate::analysis::AnalysisResult;
use crate::store::{HeapIndex, ObjectStore, TraceRec};
use crate::Id;

/// Raw decoded stack traces, frame ids resolved through the frame table.
/// A frame id the dump never defined is reported, not fatal.
pub fn stack_trace_report(ix: &HeapIndex) -> AnalysisResult {
    let mut result = AnalysisResult::new("Stack traces");

    for trace in ix.stack_traces().sorted_by_key(|t| t.serial) {
        result.body.push(format!(
            "Trace serial: {}, thread serial: {}, frames: {}",
            trace.serial,
            trace.thread_serial,
            trace.frame_ids.len()
        ));
        for frame_id in &trace.frame_ids {
            result.body.push(render_frame(ix, *frame_id));
        }
    }
    result
}

/// Per-thread stacks: thread name, liveness from the start/end lifecycle
/// records, and the frames of the thread's trace.
pub fn thread_stack_report(ix: &HeapIndex) -> AnalysisResult {
    let mut result = AnalysisResult::new("Thread stacks");

    let traces: Vec<&TraceRec> = ix
        .stack_traces()
        .sorted_by_key(|t| t.thread_serial)
        .collect();

    for trace in traces {
        let name = ix
            .thread(trace.thread_serial)
            .and_then(|t| ix.interned_string(t.thread_name_id()))
            .unwrap_or("(unnamed)");
        let state = if ix.thread_alive(trace.thread_serial) {
            "alive"
        } else {
            "ended"
        };
        result.body.push(format!(
            "Thread {} ({}, {}):",
            trace.thread_serial, name, state
        ));
        if trace.frame_ids.is_empty() {
            result.body.push("  (no frames)".to_owned());
        }
        for frame_id in &trace.frame_ids {
            result.body.push(render_frame(ix, *frame_id));
        }
    }
    result
}

fn render_frame(ix: &HeapIndex, frame_id: Id) -> String {
    let frame = match ix.stack_frame(frame_id) {
        Some(f) => f,
        None => return format!("  (frame {} not found)", frame_id),
    };

    let class_name = ix
        .load_class_by_serial(frame.class_serial())
        .map(|lc| ix.class_name(lc.class_obj_id()))
        .unwrap_or_else(|| "(class not found)".to_owned());
    let method = ix
        .interned_string(frame.method_name_id())
        .unwrap_or("unknown method");
    let source = ix
        .interned_string(frame.source_file_name_id())
        .unwrap_or("unknown source file");

    format!(
        "  at {}.{} ({}:{})",
        class_name,
        method,
        source,
        frame.line_num()
    )
}

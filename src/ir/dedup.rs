use crate::ir::Frame;

/// Collapses runs of visually identical frames.
///
/// A dropped frame's delay is added to the retained frame, whose time moves to
/// the dropped frame's time. Indices are renumbered densely from zero.
pub fn deduplicate_frames(frames: Vec<Frame>) -> Vec<Frame> {
    let mut kept: Vec<Frame> = Vec::with_capacity(frames.len());

    for frame in frames {
        match kept.last_mut() {
            Some(previous) if previous.same_content(&frame) => {
                previous.delay += frame.delay;
                previous.time = frame.time;
            }
            _ => kept.push(frame),
        }
    }

    for (index, frame) in kept.iter_mut().enumerate() {
        frame.index = index;
    }
    kept
}

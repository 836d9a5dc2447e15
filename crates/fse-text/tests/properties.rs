//! Property tests for the line/group store.
//!
//! These drive random interleavings of inject/extract/squeeze against a
//! naive model (a `Vec<String>` plus plain positions) and assert the store's
//! numbering, group invariants, and mark bounds after every step. The
//! `validate` walk re-checks the full structural story each time, so a
//! single failing case pinpoints the first operation that broke an
//! invariant.

use proptest::prelude::*;

use fse_text::store::{Frame, LineId, TextStore};

/// One random edit against both the store and the model.
#[derive(Debug, Clone)]
enum EditOp {
    /// Insert `count` lines before line number `at` (clamped into range).
    Inject { at: u32, count: u32 },
    /// Extract `count` lines starting at line number `at` (clamped).
    Extract { at: u32, count: u32 },
}

fn op_strategy() -> impl Strategy<Value = EditOp> {
    prop_oneof![
        (0u32..400, 1u32..120).prop_map(|(at, count)| EditOp::Inject { at, count }),
        (0u32..400, 1u32..120).prop_map(|(at, count)| EditOp::Extract { at, count }),
    ]
}

/// Apply one op to the store and to the model, keeping them in lockstep.
fn apply(
    store: &mut TextStore,
    frame: &mut Frame,
    model: &mut Vec<String>,
    serial: &mut u32,
    op: &EditOp,
) {
    match *op {
        EditOp::Inject { at, count } => {
            let at = at.min(model.len() as u32);
            let (first, last) = store.create_lines(count);
            let mut cur = Some(first);
            let mut texts = Vec::new();
            while let Some(id) = cur {
                let text = format!("n{serial}");
                *serial += 1;
                store.set_text(id, text.clone());
                texts.push(text);
                cur = store.next_line(id);
            }
            let before = store
                .line_from_number(frame, at)
                .expect("insertion point clamped into range");
            store.inject_lines(frame, first, last, before);
            for (i, text) in texts.into_iter().enumerate() {
                model.insert(at as usize + i, text);
            }
        }
        EditOp::Extract { at, count } => {
            if model.is_empty() {
                return;
            }
            let at = at.min(model.len() as u32 - 1);
            let count = count.min(model.len() as u32 - at);
            let first = store.line_from_number(frame, at).expect("start in range");
            let last = store
                .line_from_number(frame, at + count - 1)
                .expect("end in range");
            store.extract_lines(frame, first, last);
            // Clear and destroy the detached run.
            let mut cur = Some(first);
            while let Some(id) = cur {
                let _ = store.take_text(id);
                cur = store.next_line(id);
            }
            store.destroy_lines(first, last);
            model.drain(at as usize..(at + count) as usize);
        }
    }
}

/// Full lockstep check: content order, numbering round-trip, invariants.
fn check(store: &TextStore, frame: &Frame, model: &[String]) {
    store.validate(frame);
    assert_eq!(store.line_count(frame) as usize, model.len() + 1);
    for (n, expected) in model.iter().enumerate() {
        let id = store
            .line_from_number(frame, n as u32)
            .expect("model line must exist");
        assert_eq!(store.line(id).text(), expected, "content diverged at {n}");
        assert_eq!(store.line_to_number(id), n as u32, "numbering diverged at {n}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn inject_extract_interleavings_preserve_numbering(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut store = TextStore::new();
        let mut frame = Frame::new(&mut store);
        let mut model: Vec<String> = Vec::new();
        let mut serial = 0u32;

        for op in &ops {
            apply(&mut store, &mut frame, &mut model, &mut serial, op);
            check(&store, &frame, &model);
        }
    }

    #[test]
    fn pool_never_leaks_lines(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut store = TextStore::new();
        let mut frame = Frame::new(&mut store);
        let mut model: Vec<String> = Vec::new();
        let mut serial = 0u32;

        for op in &ops {
            apply(&mut store, &mut frame, &mut model, &mut serial, op);
        }
        // Every line is either in the document or back in the pool.
        prop_assert_eq!(store.live_lines() as u32, store.line_count(&frame));
    }

    #[test]
    fn squeeze_leaves_region_empty(
        fl in 0u32..6,
        span in 0u32..6,
        fc in 0u32..20,
        lc in 0u32..20,
        marks in prop::collection::vec((0u32..12, 0u32..20), 0..16),
    ) {
        let mut store = TextStore::new();
        let mut frame = Frame::new(&mut store);
        let (first, last) = store.create_lines(12);
        let sentinel = frame.sentinel();
        store.inject_lines(&mut frame, first, last, sentinel);

        let line_ids: Vec<LineId> = (0..12)
            .map(|n| store.line_from_number(&frame, n).expect("line exists"))
            .collect();

        let mut slots = Vec::new();
        for &(line, col) in &marks {
            let mut slot = None;
            store.place_mark(&mut slot, line_ids[line as usize], col);
            slots.push(slot.expect("mark placed"));
        }

        let ll = (fl + span).min(11);
        let (fc, lc) = if fl == ll && fc > lc { (lc, fc) } else { (fc, lc) };
        store.squeeze_marks(line_ids[fl as usize], fc, line_ids[ll as usize], lc);

        // No mark is strictly inside [(fl, fc), (ll, lc)).
        for &id in &slots {
            let mark = store.mark(id);
            let line_nr = store.line_to_number(mark.line());
            let inside = if fl == ll {
                line_nr == fl && mark.col() >= fc && mark.col() < lc
            } else {
                (line_nr == fl && mark.col() >= fc)
                    || (line_nr > fl && line_nr < ll)
                    || (line_nr == ll && mark.col() < lc)
            };
            prop_assert!(!inside, "mark at ({line_nr}, {}) still inside region", mark.col());
        }
        store.validate(&frame);
    }
}

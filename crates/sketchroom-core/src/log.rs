//! The operation log: the single source of truth for what the drawing looks like.
//!
//! Pixels are a derived cache. Every change to the log yields a
//! [`RenderDirective`] telling the renderer the cheapest way to catch up.

use crate::operation::Operation;
use crate::tools::Preview;

/// Instruction for the rendering pipeline after a state change.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderDirective {
    /// Nothing visible changed.
    None,
    /// Draw the operation at this log index on top of the current pixels.
    Append(usize),
    /// Clear the surface and re-render every logged operation in order.
    FullReplay,
    /// Clear the surface.
    Clear,
    /// Replace the provisional overlay (`None` hides it).
    Preview(Option<Preview>),
    /// Presence markers changed; redraw the cursor overlay.
    Presence,
}

impl RenderDirective {
    /// Whether this directive rebuilds the committed layer from the log.
    pub fn resets_surface(&self) -> bool {
        matches!(self, RenderDirective::FullReplay | RenderDirective::Clear)
    }

    /// Reduce a batch produced by several state changes to directives that
    /// are correct against the log's state after the whole batch.
    ///
    /// A reset renders the final log, so it absorbs every `Append` and every
    /// earlier reset in the batch. Only the last preview matters and presence
    /// is redrawn once.
    pub fn coalesce(directives: Vec<RenderDirective>) -> Vec<RenderDirective> {
        let reset = directives.iter().rev().find(|d| d.resets_surface()).cloned();
        let mut out = Vec::with_capacity(directives.len());
        out.extend(reset.clone());

        let last_preview = directives
            .iter()
            .rposition(|d| matches!(d, RenderDirective::Preview(_)));
        let mut presence = false;
        for (i, directive) in directives.into_iter().enumerate() {
            match directive {
                RenderDirective::None | RenderDirective::FullReplay | RenderDirective::Clear => {}
                RenderDirective::Append(_) if reset.is_some() => {}
                RenderDirective::Append(_) => out.push(directive),
                RenderDirective::Preview(_) if Some(i) != last_preview => {}
                RenderDirective::Preview(_) => out.push(directive),
                RenderDirective::Presence if presence => {}
                RenderDirective::Presence => {
                    presence = true;
                    out.push(directive);
                }
            }
        }
        out
    }
}

/// Decides where an arriving operation lands in the log.
///
/// The shipped policy is arrival order. A logical-clock or transform-based
/// ordering can be substituted here without touching rendering code, as long
/// as it reports [`RenderDirective::FullReplay`] when it inserts anywhere but
/// the end.
pub trait OrderingPolicy {
    fn insert(&mut self, ops: &mut Vec<Operation>, op: Operation) -> RenderDirective;
}

/// Append every operation in the order it is observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrivalOrder;

impl OrderingPolicy for ArrivalOrder {
    fn insert(&mut self, ops: &mut Vec<Operation>, op: Operation) -> RenderDirective {
        ops.push(op);
        RenderDirective::Append(ops.len() - 1)
    }
}

/// Append-only (per observer) sequence of operations.
#[derive(Debug, Clone, Default)]
pub struct OperationLog<P = ArrivalOrder> {
    ops: Vec<Operation>,
    policy: P,
    /// Bumped whenever the log shrinks or is replaced.
    generation: u64,
}

impl OperationLog<ArrivalOrder> {
    /// Create an empty log with arrival ordering.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P: OrderingPolicy> OperationLog<P> {
    /// Create an empty log with a custom ordering policy.
    pub fn with_policy(policy: P) -> Self {
        Self {
            ops: Vec::new(),
            policy,
            generation: 0,
        }
    }

    /// Add an operation.
    pub fn append(&mut self, op: Operation) -> RenderDirective {
        self.policy.insert(&mut self.ops, op)
    }

    /// Discard the log and install a snapshot. Always requires a full replay.
    pub fn replace_all(&mut self, ops: Vec<Operation>) -> RenderDirective {
        self.ops = ops;
        self.generation += 1;
        RenderDirective::FullReplay
    }

    /// Empty the log.
    pub fn clear(&mut self) -> RenderDirective {
        self.ops.clear();
        self.generation += 1;
        RenderDirective::Clear
    }
}

impl<P> OperationLog<P> {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Operation> {
        self.ops.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.ops.iter()
    }

    pub fn as_slice(&self) -> &[Operation] {
        &self.ops
    }

    /// Number of clears and replacements so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<'a, P> IntoIterator for &'a OperationLog<P> {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Author, ToolKind};
    use kurbo::Point;

    fn line(x: f64) -> Operation {
        Operation::new(
            ToolKind::Line,
            "#fff",
            1.0,
            vec![Point::new(x, 0.0), Point::new(x, 10.0)],
            &Author::default(),
        )
    }

    #[test]
    fn test_append_is_monotonic() {
        let mut log = OperationLog::new();
        let mut last_len = 0;
        for i in 0..10 {
            let directive = log.append(line(i as f64));
            assert_eq!(directive, RenderDirective::Append(i));
            assert!(log.len() > last_len);
            last_len = log.len();
        }
        assert_eq!(log.generation(), 0);
    }

    #[test]
    fn test_append_never_reorders_existing() {
        let mut log = OperationLog::new();
        log.append(line(1.0));
        log.append(line(2.0));
        let before: Vec<_> = log.iter().cloned().collect();
        log.append(line(3.0));
        assert_eq!(&log.as_slice()[..2], before.as_slice());
    }

    #[test]
    fn test_replace_all_requests_full_replay() {
        let mut log = OperationLog::new();
        log.append(line(1.0));
        let directive = log.replace_all(vec![line(5.0), line(6.0)]);
        assert_eq!(directive, RenderDirective::FullReplay);
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(0), Some(&line(5.0)));
        assert_eq!(log.generation(), 1);
    }

    #[test]
    fn test_clear() {
        let mut log = OperationLog::new();
        log.append(line(1.0));
        assert_eq!(log.clear(), RenderDirective::Clear);
        assert!(log.is_empty());
        assert_eq!(log.generation(), 1);
    }

    #[test]
    fn test_coalesce_reset_absorbs_appends() {
        let batch = vec![
            RenderDirective::Append(0),
            RenderDirective::FullReplay,
            RenderDirective::Presence,
            RenderDirective::Append(1),
            RenderDirective::None,
            RenderDirective::Presence,
        ];
        assert_eq!(
            RenderDirective::coalesce(batch),
            vec![RenderDirective::FullReplay, RenderDirective::Presence]
        );

        let batch = vec![
            RenderDirective::FullReplay,
            RenderDirective::Clear,
            RenderDirective::Append(0),
        ];
        assert_eq!(RenderDirective::coalesce(batch), vec![RenderDirective::Clear]);
    }

    #[test]
    fn test_coalesce_keeps_appends_without_reset() {
        let batch = vec![
            RenderDirective::Append(3),
            RenderDirective::Preview(None),
            RenderDirective::Append(4),
            RenderDirective::Preview(None),
        ];
        assert_eq!(
            RenderDirective::coalesce(batch),
            vec![
                RenderDirective::Append(3),
                RenderDirective::Append(4),
                RenderDirective::Preview(None),
            ]
        );
    }

    #[test]
    fn test_custom_policy() {
        /// Keeps the log sorted by first x coordinate.
        struct SortedByX;
        impl OrderingPolicy for SortedByX {
            fn insert(&mut self, ops: &mut Vec<Operation>, op: Operation) -> RenderDirective {
                let at = ops.partition_point(|o| o.points[0].x <= op.points[0].x);
                let tail = at == ops.len();
                ops.insert(at, op);
                if tail {
                    RenderDirective::Append(at)
                } else {
                    RenderDirective::FullReplay
                }
            }
        }

        let mut log = OperationLog::with_policy(SortedByX);
        assert_eq!(log.append(line(5.0)), RenderDirective::Append(0));
        assert_eq!(log.append(line(1.0)), RenderDirective::FullReplay);
        assert_eq!(log.get(0), Some(&line(1.0)));
    }
}

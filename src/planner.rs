//! Batch region planner: groups a device's readable points into minimal
//! contiguous Modbus reads per function code.
//!
//! Partitions by function code, sorts by address within each partition,
//! then walks the sorted run and flushes a new group on any address gap.

use crate::model::{FuncCode, Point};
use std::collections::BTreeMap;

/// One contiguous read this device's bus worker will issue each poll pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchGroup {
    pub func_code: FuncCode,
    pub start_addr: u16,
    pub quantity: u16,
    /// Points covered by this group, in address order.
    pub points: Vec<Point>,
    /// Set when one or more covered points had a declared `regNum` that
    /// disagreed with their data type's implied register count; the
    /// planner corrected it rather than rejecting the point.
    pub geometry_warning: bool,
}

impl BatchGroup {
    fn end_addr(&self) -> u16 {
        self.start_addr + self.quantity - 1
    }
}

/// Plan the batch reads for one device's point table.
///
/// Stateless, deterministic, and total: every readable point (`r` or `rw`)
/// appears in exactly one group; write-only (`w`) points appear in none.
/// An empty point table yields an empty plan.
pub fn plan(points: &[Point]) -> Vec<BatchGroup> {
    let mut by_func: BTreeMap<FuncCode, Vec<&Point>> = BTreeMap::new();
    for p in points {
        if p.rw.is_readable() {
            by_func
                .entry(p.func_code)
                .or_default()
                .push(p);
        }
    }

    let mut groups = Vec::new();
    for (func_code, mut pts) in by_func {
        pts.sort_by_key(|p| p.reg_addr);

        let mut current: Option<BatchGroup> = None;
        for p in pts {
            let count = p.effective_reg_count();
            let mismatch = p.has_geometry_mismatch();
            let p_end = p.reg_addr + count - 1;

            match &mut current {
                Some(group) if p.reg_addr == group.end_addr() + 1 => {
                    group.quantity = p_end - group.start_addr + 1;
                    group.points.push(p.clone());
                    group.geometry_warning |= mismatch;
                }
                _ => {
                    if let Some(group) = current.take() {
                        groups.push(group);
                    }
                    current = Some(BatchGroup {
                        func_code,
                        start_addr: p.reg_addr,
                        quantity: count,
                        points: vec![p.clone()],
                        geometry_warning: mismatch,
                    });
                }
            }
        }
        if let Some(group) = current {
            groups.push(group);
        }
    }
    groups
}

//! Per-metric plan construction.

use super::{Color, Combine, Consolidation, Plan, PlanError};
use crate::registry::{Node, Registry};
use std::fmt;
use std::str::FromStr;

const RED: Color = Color::rgb(0xFF, 0x00, 0x00);
const GREEN: Color = Color::rgb(0x00, 0xFF, 0x00);
const BLUE: Color = Color::rgb(0x00, 0x00, 0xFF);
const GRAY: Color = Color::rgb(0x80, 0x80, 0x80);
const SPREAD: Color = Color::rgba(0x00, 0x00, 0xFF, 0x20);
const CONFIRM_TICK: Color = Color::rgba(0x00, 0xFF, 0xFF, 0x20);

/// Label of the single exported series of plans that produce a summary
pub const SUMMARY_LABEL: &str = "avg";

/// Chart content selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Transaction throughput across the testbed
    TxRate,
    /// Proposer, voter and transaction block delays of one node
    BlockDelay,
    /// Transaction block confirmation latency
    Confirm,
    /// Message queue length of one node
    Queue,
    /// Block mining rate per role, summed over nodes
    Mining,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::TxRate,
        MetricKind::BlockDelay,
        MetricKind::Confirm,
        MetricKind::Queue,
        MetricKind::Mining,
    ];

    pub const NAMES: [&'static str; 5] = ["txrate", "blockdelay", "confirm", "queue", "mining"];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::TxRate => "txrate",
            MetricKind::BlockDelay => "blockdelay",
            MetricKind::Confirm => "confirm",
            MetricKind::Queue => "queue",
            MetricKind::Mining => "mining",
        }
    }

    /// Whether plans of this kind export a series for summarization
    pub fn has_summary(self) -> bool {
        matches!(self, MetricKind::TxRate | MetricKind::Confirm)
    }

    /// Build the plan for this kind.
    ///
    /// `window` is the smoothing width in samples for `txrate` and `confirm`
    /// (1 disables smoothing) and the fetch step in seconds for `blockdelay`
    /// and `queue`.
    pub fn build(self, registry: &Registry, focus: &str, window: u32) -> Result<Plan, PlanError> {
        if window == 0 {
            return Err(PlanError::InvalidWindow);
        }
        let focus = registry
            .get(focus)
            .ok_or_else(|| PlanError::NodeNotFound(focus.to_string()))?;

        let plan = match self {
            MetricKind::TxRate => txrate(registry, focus, window),
            MetricKind::BlockDelay => blockdelay(focus, window),
            MetricKind::Confirm => confirm(registry, focus, window),
            MetricKind::Queue => queue(focus, window),
            MetricKind::Mining => mining(registry, focus),
        };
        plan.validate()?;
        Ok(plan)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| PlanError::UnknownMetric(s.to_string()))
    }
}

/// Parse `selector` and build its plan
pub fn build_plan(selector: &str, registry: &Registry, focus: &str, window: u32) -> Result<Plan, PlanError> {
    let kind: MetricKind = selector.parse()?;
    kind.build(registry, focus, window)
}

fn smoothing(window: u32) -> Option<u32> {
    (window != 1).then_some(window)
}

fn txrate(registry: &Registry, focus: &Node, window: u32) -> Plan {
    let mut plan = Plan::new("EVM Throughput", "TPS");
    let smoothing = smoothing(window);

    let mut generated = Vec::with_capacity(registry.len());
    let mut confirmed = Vec::with_capacity(registry.len());
    for node in registry.nodes() {
        generated.push(plan.raw(node, "gen", "generated_tx", Consolidation::Average, None));
        let confirm = plan.raw(node, "confirm", "confirmed_tx", Consolidation::Average, None);
        // Min, max and average are taken over the smoothed per-node series
        let confirm = match smoothing {
            Some(width) => plan.derive(
                format!("{}_wa", confirm),
                Combine::WindowedTrend { width },
                vec![confirm],
            ),
            None => confirm,
        };
        confirmed.push(confirm);
    }
    let blocks = plan.raw(focus, "tx_blk_confirm", "confirmed_tx_blk", Consolidation::Average, None);

    let gen_sum = plan.derive("gen_sum", Combine::SumAcrossNodes, generated);
    if let Some(width) = smoothing {
        plan.derive("gen_sum_wa", Combine::WindowedTrend { width }, vec![gen_sum]);
    }
    let max = plan.derive("confirm_max", Combine::CrossNodeMax, confirmed.clone());
    let min = plan.derive("confirm_min", Combine::CrossNodeMin, confirmed.clone());
    let avg = plan.derive("confirm_avg", Combine::CrossNodeAverage, confirmed);
    let spread = plan.derive("min_max_diff", Combine::Difference, vec![max, min.clone()]);

    let focus_confirm = match smoothing {
        Some(_) => super::series_name(&focus.id, "confirm_wa"),
        None => super::series_name(&focus.id, "confirm"),
    };
    plan.line(&focus_confirm, Some(RED), Some(format!("{} Confirmed", focus.id)));
    // Invisible base line so the spread area starts at the minimum
    plan.line(&min, None, None);
    plan.area(&spread, SPREAD, true);
    plan.line(&avg, Some(BLUE), Some("Avg Confirmed".to_string()));
    plan.tick(&blocks, CONFIRM_TICK, 1.0, "Tx Block Confirmation");
    plan.export(&avg, SUMMARY_LABEL);
    plan
}

fn blockdelay(focus: &Node, step: u32) -> Plan {
    let mut plan = Plan::new(format!("Block Latency ({})", focus.id), "Latency (ms)");
    let step = Some(step as u64);

    let proposer = plan.raw(focus, "proposer_delay", "proposer_delay_mean", Consolidation::Average, step);
    let voter = plan.raw(focus, "voter_delay", "voter_delay_mean", Consolidation::Average, step);
    let tx = plan.raw(focus, "tx_delay", "tx_delay_mean", Consolidation::Average, step);

    plan.line(&proposer, Some(RED), Some("Proposer".to_string()));
    plan.line(&voter, Some(GREEN), Some("Voter".to_string()));
    plan.line(&tx, Some(BLUE), Some("Tx".to_string()));
    plan
}

fn confirm(registry: &Registry, focus: &Node, window: u32) -> Plan {
    let mut plan = Plan::new(format!("Confirmation Latency ({})", focus.id), "Latency (s)");
    let smoothing = smoothing(window);

    let mut latencies = Vec::with_capacity(registry.len());
    for node in registry.nodes() {
        let latency = plan.raw(node, "txblk_cfm", "txblk_cfm_mean", Consolidation::Average, None);
        if let Some(width) = smoothing {
            plan.derive(
                format!("{}_wa", latency),
                Combine::WindowedTrend { width },
                vec![latency.clone()],
            );
        }
        latencies.push(latency);
    }
    // The cross-node average uses the instantaneous series
    let avg = plan.derive("txblk_cfm", Combine::CrossNodeAverage, latencies);

    plan.line(&avg, Some(RED), Some("Tx Block (All nodes, Instantaneous)".to_string()));
    let focus_latency = super::series_name(&focus.id, "txblk_cfm");
    plan.line(&focus_latency, Some(BLUE), Some("Tx Block (Instantaneous)".to_string()));
    if smoothing.is_some() {
        let windowed = format!("{}_wa", focus_latency);
        plan.line(&windowed, Some(GREEN), Some("Tx Block (Windowed)".to_string()));
    }
    plan.export(&avg, SUMMARY_LABEL);
    plan
}

fn queue(focus: &Node, step: u32) -> Plan {
    let mut plan = Plan::new(format!("Queue Length ({})", focus.id), "Queue Length (Msg)");
    let length = plan.raw(focus, "queue", "queue_length", Consolidation::Average, Some(step as u64));
    plan.line(&length, Some(BLUE), None);
    plan
}

fn mining(registry: &Registry, focus: &Node) -> Plan {
    let mut plan = Plan::new(format!("Mining Rate ({})", focus.id), "Mining Rate (Blk/s)");

    let mut proposer = Vec::with_capacity(registry.len());
    let mut voter = Vec::with_capacity(registry.len());
    let mut tx = Vec::with_capacity(registry.len());
    for node in registry.nodes() {
        proposer.push(plan.raw(node, "mined_proposer", "mined_proposer", Consolidation::Average, None));
        voter.push(plan.raw(node, "mined_voter", "mined_voter", Consolidation::Average, None));
        tx.push(plan.raw(node, "mined_tx", "mined_tx", Consolidation::Average, None));
    }
    let proposer = plan.derive("mined_proposer_sum", Combine::SumAcrossNodes, proposer);
    let voter = plan.derive("mined_voter_sum", Combine::SumAcrossNodes, voter);
    let tx = plan.derive("mined_tx_sum", Combine::SumAcrossNodes, tx);

    plan.line(&proposer, Some(RED), Some("Total Proposer".to_string()));
    plan.line(&voter, Some(GREEN), Some("Total Voter".to_string()));
    plan.line(&tx, Some(BLUE), Some("Total Tx".to_string()));
    plan.tick(&proposer, GRAY, 1.0, "Proposer Mined");
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{DerivedSeries, Source, Style};
    use proptest::prelude::*;

    fn registry(ids: &[&str]) -> Registry {
        ids.iter().copied().collect()
    }

    fn derived<'a>(plan: &'a Plan, name: &str) -> &'a DerivedSeries {
        match &plan.definition(name).unwrap().source {
            Source::Derived(d) => d,
            Source::Raw(_) => panic!("{} is a raw series", name),
        }
    }

    fn trend_count(plan: &Plan) -> usize {
        plan.derived()
            .filter(|(_, d)| matches!(d.combine, Combine::WindowedTrend { .. }))
            .count()
    }

    #[test]
    fn test_unknown_metric() {
        let err = build_plan("bogus", &registry(&["A"]), "A", 1).unwrap_err();
        assert_eq!(err, PlanError::UnknownMetric("bogus".to_string()));
        assert!(err.to_string().contains("txrate, blockdelay, confirm, queue, mining"));
    }

    #[test]
    fn test_unknown_focus_node() {
        for kind in MetricKind::ALL {
            let err = kind.build(&registry(&["A", "B"]), "Z", 1).unwrap_err();
            assert_eq!(err, PlanError::NodeNotFound("Z".to_string()));
        }
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = build_plan("txrate", &registry(&["A"]), "A", 0).unwrap_err();
        assert_eq!(err, PlanError::InvalidWindow);
    }

    #[test]
    fn test_selector_roundtrip() {
        for (kind, name) in MetricKind::ALL.iter().zip(MetricKind::NAMES) {
            assert_eq!(kind.as_str(), name);
            assert_eq!(name.parse::<MetricKind>().unwrap(), *kind);
        }
    }

    #[test]
    fn test_txrate_generated_sum_covers_every_node_once() {
        let plan = build_plan("txrate", &registry(&["C", "A", "B"]), "B", 1).unwrap();
        let sum = derived(&plan, "gen_sum");

        assert_eq!(sum.combine, Combine::SumAcrossNodes);
        assert_eq!(sum.operands, vec!["A_gen", "B_gen", "C_gen"]);
    }

    #[test]
    fn test_txrate_without_smoothing() {
        let plan = build_plan("txrate", &registry(&["A", "B", "C"]), "A", 1).unwrap();

        assert_eq!(trend_count(&plan), 0);
        assert_eq!(plan.raw_refs().count(), 7);
        let avg = derived(&plan, "confirm_avg");
        assert_eq!(avg.operands, vec!["A_confirm", "B_confirm", "C_confirm"]);
        assert_eq!(derived(&plan, "min_max_diff").operands, vec!["confirm_max", "confirm_min"]);

        assert_eq!(plan.render[0].series, "A_confirm");
        assert_eq!(plan.render[1].color, None);
        assert_eq!(plan.render[2].style, Style::Area { stack: true });
        assert!(matches!(plan.render[4].style, Style::Tick { .. }));
        assert_eq!(plan.render[4].series, "A_tx_blk_confirm");

        assert_eq!(plan.export.len(), 1);
        assert_eq!(plan.export[0].series, "confirm_avg");
        assert_eq!(plan.export[0].label, SUMMARY_LABEL);
    }

    #[test]
    fn test_txrate_with_smoothing() {
        let plan = build_plan("txrate", &registry(&["A", "B", "C"]), "B", 30).unwrap();

        // One trend per confirmed series plus one for the generated sum
        assert_eq!(trend_count(&plan), 4);
        assert_eq!(
            derived(&plan, "B_confirm_wa").combine,
            Combine::WindowedTrend { width: 30 }
        );
        assert_eq!(derived(&plan, "gen_sum_wa").operands, vec!["gen_sum"]);
        let max = derived(&plan, "confirm_max");
        assert_eq!(max.operands, vec!["A_confirm_wa", "B_confirm_wa", "C_confirm_wa"]);
        assert_eq!(plan.render[0].series, "B_confirm_wa");
    }

    #[test]
    fn test_reduction_operand_count_tracks_node_count() {
        let three = build_plan("txrate", &registry(&["A", "B", "C"]), "A", 1).unwrap();
        let five = build_plan("txrate", &registry(&["A", "B", "C", "D", "E"]), "A", 1).unwrap();

        for name in ["confirm_min", "confirm_max", "confirm_avg"] {
            assert_eq!(derived(&three, name).operands.len(), 3);
            assert_eq!(derived(&five, name).operands.len(), 5);
            assert_eq!(derived(&three, name).combine, derived(&five, name).combine);
        }
        assert_eq!(three.render.len(), five.render.len());
        assert_eq!(three.export, five.export);
    }

    #[test]
    fn test_blockdelay_uses_focus_node_only() {
        let plan = build_plan("blockdelay", &registry(&["A", "B"]), "B", 10).unwrap();

        let raws: Vec<_> = plan.raw_refs().collect();
        assert_eq!(raws.len(), 3);
        assert!(raws.iter().all(|(_, r)| r.node == "B" && r.step == Some(10)));
        assert_eq!(plan.render.len(), 3);
        assert!(plan.export.is_empty());
        assert_eq!(plan.title, "Block Latency (B)");
    }

    #[test]
    fn test_confirm_plan() {
        let plan = build_plan("confirm", &registry(&["A", "B"]), "A", 5).unwrap();

        assert_eq!(trend_count(&plan), 2);
        let avg = derived(&plan, "txblk_cfm");
        assert_eq!(avg.combine, Combine::CrossNodeAverage);
        assert_eq!(avg.operands, vec!["A_txblk_cfm", "B_txblk_cfm"]);

        let rendered: Vec<&str> = plan.render.iter().map(|r| r.series.as_str()).collect();
        assert_eq!(rendered, vec!["txblk_cfm", "A_txblk_cfm", "A_txblk_cfm_wa"]);
        assert_eq!(plan.export[0].series, "txblk_cfm");

        let unsmoothed = build_plan("confirm", &registry(&["A", "B"]), "A", 1).unwrap();
        assert_eq!(trend_count(&unsmoothed), 0);
        assert_eq!(unsmoothed.render.len(), 2);
    }

    #[test]
    fn test_queue_plan() {
        let plan = build_plan("queue", &registry(&["A", "B"]), "A", 5).unwrap();
        assert_eq!(plan.definitions.len(), 1);
        assert_eq!(plan.render.len(), 1);
        assert!(plan.export.is_empty());
    }

    #[test]
    fn test_mining_three_nodes() {
        let plan = build_plan("mining", &registry(&["A", "B", "C"]), "A", 1).unwrap();

        assert_eq!(plan.raw_refs().count(), 9);
        let sums: Vec<_> = plan
            .derived()
            .filter(|(_, d)| d.combine == Combine::SumAcrossNodes)
            .collect();
        assert_eq!(sums.len(), 3);
        assert_eq!(plan.derived().count(), 3);
        assert_eq!(trend_count(&plan), 0);
        assert!(plan.export.is_empty());
        assert_eq!(plan.render.last().unwrap().series, "mined_proposer_sum");
    }

    proptest! {
        #[test]
        fn prop_window_one_never_smooths(
            ids in prop::collection::btree_set("[a-z]{1,6}", 1..8),
            kind in prop::sample::select(MetricKind::ALL.to_vec()),
        ) {
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            let plan = kind.build(&registry(&ids), ids[0], 1).unwrap();
            prop_assert_eq!(trend_count(&plan), 0);
        }

        #[test]
        fn prop_build_is_deterministic(
            ids in prop::collection::vec("[a-z]{1,6}", 1..8),
            window in 1u32..120,
            kind in prop::sample::select(MetricKind::ALL.to_vec()),
        ) {
            let forward: Vec<&str> = ids.iter().map(String::as_str).collect();
            let reversed: Vec<&str> = forward.iter().rev().copied().collect();
            let a = kind.build(&registry(&forward), forward[0], window).unwrap();
            let b = kind.build(&registry(&reversed), forward[0], window).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_reductions_take_every_node(
            ids in prop::collection::btree_set("[a-z]{1,6}", 1..10),
            window in 1u32..60,
        ) {
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            let plan = MetricKind::TxRate.build(&registry(&ids), ids[0], window).unwrap();
            for (_, d) in plan.derived().filter(|(_, d)| d.combine.is_set_reduction()) {
                prop_assert_eq!(d.operands.len(), ids.len());
            }
        }
    }
}

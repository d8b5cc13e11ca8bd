mod config;
use log::{debug, info};

use std::collections::{BTreeMap, HashMap};

pub mod builder;
pub mod manual;

pub use crate::config::*;

// **** Private structures ****

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
struct CandidateId(u32);

impl CandidateId {
    fn idx(self) -> usize {
        self.0 as usize
    }
}

// Invariant: the approvals are distinct and in increasing order.
// Since candidate ids follow the sorted candidate names, so do the approvals.
#[derive(Eq, PartialEq, Debug, Clone)]
struct BallotInternal {
    approvals: Vec<CandidateId>,
}

/// Sizes of the intersections between the approval sets of two candidates.
struct PairCounts {
    num_candidates: usize,
    counts: Vec<u64>,
}

impl PairCounts {
    fn new(num_candidates: usize) -> PairCounts {
        PairCounts {
            num_candidates,
            counts: vec![0; num_candidates * num_candidates],
        }
    }

    fn incr(&mut self, a: CandidateId, b: CandidateId) {
        self.counts[a.idx() * self.num_candidates + b.idx()] += 1;
    }

    fn get(&self, a: CandidateId, b: CandidateId) -> u64 {
        self.counts[a.idx() * self.num_candidates + b.idx()]
    }
}

/// Builds the key under which a candidate of a given contest is known in an
/// election-wide analysis.
///
/// ```
/// assert_eq!(approval_voting::composite_key("Ann Lee", "Mayor"), "Ann Lee (Mayor)");
/// ```
pub fn composite_key(candidate: &str, contest: &str) -> String {
    format!("{} ({})", candidate, contest)
}

/// Recovers the contest embedded at the end of a composite key.
///
/// Keys without a parenthesized suffix do not belong to any contest.
pub fn contest_of_key(key: &str) -> Option<&str> {
    if !key.contains(')') {
        return None;
    }
    let start = key.rfind('(')?;
    Some(key[start + 1..].trim_end_matches(')'))
}

/// Runs the co-approval and voting pattern analysis on a set of ballots.
///
/// Arguments:
/// * `ballots` the approvals made on each ballot
/// * `mode` whether the candidate keys belong to a single contest or span a whole election
/// * `candidates` the registered candidates. They take part in the analysis even if no
/// ballot approved them. Candidates found on the ballots are always added.
pub fn run_approval_stats(
    ballots: &ApprovalBallots,
    mode: &AnalysisMode,
    candidates: &Option<Vec<String>>,
) -> Result<ApprovalAnalysis, AnalysisErrors> {
    info!(
        "Processing {:?} ballots, registered candidates: {:?}, mode: {:?}",
        ballots.len(),
        candidates.as_ref().map(|l| l.len()),
        mode
    );

    let names = checks(ballots, candidates)?;
    let candidate_ids: HashMap<&str, CandidateId> = names
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.as_str(), CandidateId(idx as u32)))
        .collect();

    // Ballots are visited in increasing ballot id order.
    let internal: Vec<BallotInternal> = ballots
        .ballots
        .values()
        .map(|approved| {
            let mut approvals: Vec<CandidateId> = approved
                .iter()
                .filter_map(|name| candidate_ids.get(name.as_str()).cloned())
                .collect();
            approvals.sort();
            BallotInternal { approvals }
        })
        .collect();

    let tallies = compute_tallies(&internal, names.len());
    let candidate_approvals: BTreeMap<String, u64> = names
        .iter()
        .cloned()
        .zip(tallies.iter().cloned())
        .collect();

    let num_with_approvals = internal
        .iter()
        .filter(|b| !b.approvals.is_empty())
        .count();
    if num_with_approvals < 2 || names.len() < 2 {
        info!(
            "Not enough data for an analysis: {} ballots with approvals, {} candidates",
            num_with_approvals,
            names.len()
        );
        return Ok(ApprovalAnalysis {
            candidates: names,
            co_approvals: Vec::new(),
            patterns: None,
            candidate_approvals,
        });
    }

    let co_approvals = compute_co_approvals(&internal, &names, &tallies, *mode);
    debug!(
        "run_approval_stats: {} co-approval pairs for {} candidates",
        co_approvals.len(),
        names.len()
    );
    let patterns = compute_patterns(&internal, &names, *mode);
    info!(
        "Bullet voting: {} ballots ({:.1}%), full approval: {} ballots ({:.1}%), average approvals: {:.2}",
        patterns.bullet_voting_count,
        patterns.bullet_voting_rate,
        patterns.full_approval_count,
        patterns.full_approval_rate,
        patterns.average_approvals_per_ballot
    );

    Ok(ApprovalAnalysis {
        candidates: names,
        co_approvals,
        patterns: Some(patterns),
        candidate_approvals,
    })
}

// Returns the sorted list of all the candidates.
fn checks(
    ballots: &ApprovalBallots,
    reg_candidates: &Option<Vec<String>>,
) -> Result<Vec<String>, AnalysisErrors> {
    let mut names: Vec<String> = Vec::new();
    if let Some(reg) = reg_candidates {
        for name in reg.iter() {
            if name.is_empty() {
                return Err(AnalysisErrors::EmptyCandidateName);
            }
            if names.contains(name) {
                return Err(AnalysisErrors::DuplicateCandidate(name.clone()));
            }
            names.push(name.clone());
        }
    }
    for approved in ballots.ballots.values() {
        for name in approved.iter() {
            if name.is_empty() {
                return Err(AnalysisErrors::EmptyCandidateName);
            }
        }
    }
    let mut all: Vec<String> = names;
    all.extend(ballots.ballots.values().flatten().cloned());
    all.sort();
    all.dedup();
    debug!("checks: candidates {:?}", all);
    Ok(all)
}

fn compute_tallies(ballots: &[BallotInternal], num_candidates: usize) -> Vec<u64> {
    let mut tallies = vec![0u64; num_candidates];
    for b in ballots.iter() {
        for cid in b.approvals.iter() {
            tallies[cid.idx()] += 1;
        }
    }
    tallies
}

fn compute_co_approvals(
    ballots: &[BallotInternal],
    names: &[String],
    tallies: &[u64],
    mode: AnalysisMode,
) -> Vec<CoApproval> {
    let mut pairs = PairCounts::new(names.len());
    for b in ballots.iter() {
        for a in b.approvals.iter() {
            for c in b.approvals.iter() {
                if a != c {
                    pairs.incr(*a, *c);
                }
            }
        }
    }

    let mut res: Vec<CoApproval> = Vec::new();
    for (ia, name_a) in names.iter().enumerate() {
        let a = CandidateId(ia as u32);
        let denominator = tallies[ia];
        // Nobody approved this candidate: a single contest simply skips it, while
        // the election-wide matrix keeps a full square.
        if denominator == 0 && !mode.emits_empty_pairs() {
            continue;
        }
        for (ib, name_b) in names.iter().enumerate() {
            if ia == ib {
                continue;
            }
            let count = pairs.get(a, CandidateId(ib as u32));
            res.push(CoApproval {
                candidate_a: name_a.clone(),
                candidate_b: name_b.clone(),
                co_approval_count: count,
                co_approval_rate: percentage(count, denominator),
            });
        }
    }
    res
}

fn compute_patterns(
    ballots: &[BallotInternal],
    names: &[String],
    mode: AnalysisMode,
) -> VotingPatterns {
    let num_candidates = names.len();
    let total_ballots = ballots.len() as u64;

    let mut approval_distribution: ApprovalHistogram = BTreeMap::new();
    let mut candidate_distributions: Vec<ApprovalHistogram> = vec![BTreeMap::new(); num_candidates];
    let mut anyone_but: Vec<u64> = vec![0; num_candidates];
    let mut total_approvals: u64 = 0;
    // Sorted approvals -> (count, position of the first ballot with it)
    let mut combinations: HashMap<&[CandidateId], (u64, usize)> = HashMap::new();

    for (pos, b) in ballots.iter().enumerate() {
        let size = b.approvals.len();
        *approval_distribution.entry(size).or_insert(0) += 1;
        total_approvals += size as u64;

        for cid in b.approvals.iter() {
            *candidate_distributions[cid.idx()].entry(size).or_insert(0) += 1;
        }

        if size > 0 {
            let e = combinations
                .entry(b.approvals.as_slice())
                .or_insert((0, pos));
            e.0 += 1;
        }

        if size + 1 == num_candidates {
            anyone_but[excluded_candidate(&b.approvals).idx()] += 1;
        }
    }

    let bullet_voting_count = approval_distribution.get(&1).cloned().unwrap_or(0);
    let full_approval_count = approval_distribution
        .get(&num_candidates)
        .cloned()
        .unwrap_or(0);

    let (most_common_combination, most_common_combination_count) = combinations
        .iter()
        .max_by(|(_, (c1, p1)), (_, (c2, p2))| c1.cmp(c2).then(p2.cmp(p1)))
        .map(|(cids, (count, _))| {
            let l: Vec<String> = cids.iter().map(|cid| names[cid.idx()].clone()).collect();
            (l, *count)
        })
        .unwrap_or((Vec::new(), 0));

    let candidate_approval_distributions: BTreeMap<String, ApprovalHistogram> = names
        .iter()
        .cloned()
        .zip(candidate_distributions)
        .filter(|(_, h)| !h.is_empty())
        .collect();

    let anyone_but_analysis: BTreeMap<String, u64> = names
        .iter()
        .cloned()
        .zip(anyone_but)
        .filter(|(_, c)| *c > 0)
        .collect();

    let cross_contest = match mode {
        AnalysisMode::ElectionWide => Some(compute_cross_contest(ballots, names)),
        AnalysisMode::PerContest => None,
    };

    VotingPatterns {
        total_ballots,
        bullet_voting_count,
        bullet_voting_rate: percentage(bullet_voting_count, total_ballots),
        full_approval_count,
        full_approval_rate: percentage(full_approval_count, total_ballots),
        average_approvals_per_ballot: if total_ballots > 0 {
            total_approvals as f64 / total_ballots as f64
        } else {
            0.0
        },
        most_common_combination,
        most_common_combination_count,
        approval_distribution,
        candidate_approval_distributions,
        anyone_but_analysis,
        cross_contest,
    }
}

// The single candidate missing from a ballot that approved all the others.
fn excluded_candidate(approvals: &[CandidateId]) -> CandidateId {
    for (idx, cid) in approvals.iter().enumerate() {
        if cid.idx() != idx {
            return CandidateId(idx as u32);
        }
    }
    CandidateId(approvals.len() as u32)
}

fn compute_cross_contest(ballots: &[BallotInternal], names: &[String]) -> CrossContestBehavior {
    let contests: Vec<Option<&str>> = names.iter().map(|n| contest_of_key(n)).collect();
    let mut multi_approval_voters: u64 = 0;
    let mut single_approval_only_voters: u64 = 0;
    for b in ballots.iter() {
        let mut per_contest: HashMap<&str, u32> = HashMap::new();
        for cid in b.approvals.iter() {
            if let Some(contest) = contests[cid.idx()] {
                *per_contest.entry(contest).or_insert(0) += 1;
            }
        }
        if per_contest.values().any(|c| *c > 1) {
            multi_approval_voters += 1;
        } else {
            single_approval_only_voters += 1;
        }
    }
    let total = ballots.len() as u64;
    info!(
        "Multi-approval voters: {}, single-approval only voters: {}",
        multi_approval_voters, single_approval_only_voters
    );
    CrossContestBehavior {
        multi_approval_voters,
        multi_approval_rate: percentage(multi_approval_voters, total),
        single_approval_only_voters,
        single_approval_only_rate: percentage(single_approval_only_voters, total),
    }
}

fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (count as f64 / total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::builder::Builder;
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn names(l: &[&str]) -> Vec<String> {
        l.iter().map(|s| s.to_string()).collect()
    }

    fn pair<'a>(res: &'a ApprovalAnalysis, a: &str, b: &str) -> Option<&'a CoApproval> {
        res.co_approvals
            .iter()
            .find(|ca| ca.candidate_a == a && ca.candidate_b == b)
    }

    fn assert_close(x: f64, y: f64) {
        assert!((x - y).abs() < 0.01, "{} != {}", x, y);
    }

    #[test]
    fn end_to_end_three_candidates() {
        init();
        let mut builder = Builder::new(&AnalysisMode::PerContest).unwrap();
        builder.add_ballot(1, &names(&["X", "Y"])).unwrap();
        builder.add_ballot(2, &names(&["X"])).unwrap();
        builder.add_ballot(3, &names(&["X", "Y", "Z"])).unwrap();
        builder.add_ballot(4, &names(&["Y", "Z"])).unwrap();
        let res = builder.run().unwrap();
        let p = res.patterns.clone().unwrap();
        assert_eq!(p.total_ballots, 4);
        assert_eq!(p.bullet_voting_count, 1);
        assert_eq!(p.full_approval_count, 1);
        assert_close(p.average_approvals_per_ballot, 2.0);
        let xy = pair(&res, "X", "Y").unwrap();
        assert_eq!(xy.co_approval_count, 2);
        assert_close(xy.co_approval_rate, 66.67);
        // 3 candidates, 6 ordered pairs
        assert_eq!(res.co_approvals.len(), 6);
        assert_eq!(res.candidate_approvals.get("Y"), Some(&3));
    }

    #[test]
    fn overlapping_sets_same_size() {
        let mut builder = Builder::new(&AnalysisMode::PerContest).unwrap();
        builder.add_ballot(1, &names(&["A"])).unwrap();
        builder.add_ballot(2, &names(&["A", "B"])).unwrap();
        builder.add_ballot(3, &names(&["A", "B"])).unwrap();
        builder.add_ballot(4, &names(&["B"])).unwrap();
        let res = builder.run().unwrap();
        let ab = pair(&res, "A", "B").unwrap();
        let ba = pair(&res, "B", "A").unwrap();
        assert_eq!(ab.co_approval_count, 2);
        assert_close(ab.co_approval_rate, 66.67);
        assert_close(ba.co_approval_rate, 66.67);
    }

    #[test]
    fn rates_are_asymmetric() {
        let mut builder = Builder::new(&AnalysisMode::PerContest).unwrap();
        for id in 1..=10 {
            builder.add_approval(id, "A").unwrap();
        }
        for id in 1..=5 {
            builder.add_approval(id, "B").unwrap();
        }
        let res = builder.run().unwrap();
        let ab = pair(&res, "A", "B").unwrap();
        let ba = pair(&res, "B", "A").unwrap();
        assert_eq!(ab.co_approval_count, 5);
        assert_eq!(ba.co_approval_count, 5);
        assert_close(ab.co_approval_rate, 50.0);
        assert_close(ba.co_approval_rate, 100.0);
    }

    #[test]
    fn bullet_full_and_empty_ballots() {
        let cands = names(&["A", "B", "C", "D", "E"]);
        let mut builder = Builder::new(&AnalysisMode::PerContest)
            .unwrap()
            .candidates(&cands)
            .unwrap();
        builder.add_ballot(1, &names(&["C"])).unwrap();
        builder.add_ballot(2, &cands).unwrap();
        builder.add_ballot(3, &[]).unwrap();
        builder.add_ballot(4, &names(&["A", "B"])).unwrap();
        let p = builder.run().unwrap().patterns.unwrap();
        assert_eq!(p.total_ballots, 4);
        assert_eq!(p.bullet_voting_count, 1);
        assert_eq!(p.full_approval_count, 1);
        assert_close(p.bullet_voting_rate, 25.0);
        assert_close(p.full_approval_rate, 25.0);
        assert_eq!(p.approval_distribution.get(&0), Some(&1));
        assert_eq!(p.approval_distribution.get(&5), Some(&1));
        assert_close(p.average_approvals_per_ballot, 2.0);
    }

    #[test]
    fn anyone_but_counts_only_n_minus_one() {
        let mut builder = Builder::new(&AnalysisMode::PerContest).unwrap();
        builder.add_ballot(1, &names(&["A", "B"])).unwrap();
        builder.add_ballot(2, &names(&["A", "B", "C"])).unwrap();
        builder.add_ballot(3, &names(&["C"])).unwrap();
        builder.add_ballot(4, &names(&["B", "C"])).unwrap();
        let p = builder.run().unwrap().patterns.unwrap();
        assert_eq!(p.anyone_but_analysis.len(), 2);
        assert_eq!(p.anyone_but_analysis.get("C"), Some(&1));
        assert_eq!(p.anyone_but_analysis.get("A"), Some(&1));
        assert_eq!(p.anyone_but_analysis.get("B"), None);
    }

    #[test]
    fn most_common_combination() {
        let mut builder = Builder::new(&AnalysisMode::PerContest).unwrap();
        builder.add_ballot(1, &names(&["B", "A"])).unwrap();
        builder.add_ballot(2, &names(&["A", "B"])).unwrap();
        builder.add_ballot(3, &names(&["A"])).unwrap();
        let p = builder.run().unwrap().patterns.unwrap();
        assert_eq!(p.most_common_combination, names(&["A", "B"]));
        assert_eq!(p.most_common_combination_count, 2);
    }

    #[test]
    fn most_common_combination_tie_goes_to_first_ballot() {
        let mut builder = Builder::new(&AnalysisMode::PerContest).unwrap();
        builder.add_ballot(7, &names(&["C"])).unwrap();
        builder.add_ballot(3, &names(&["B"])).unwrap();
        builder.add_ballot(5, &[]).unwrap();
        builder.add_ballot(9, &[]).unwrap();
        let p = builder.run().unwrap().patterns.unwrap();
        // Ballot 3 comes first in id order; empty ballots never count.
        assert_eq!(p.most_common_combination, names(&["B"]));
        assert_eq!(p.most_common_combination_count, 1);
    }

    #[test]
    fn candidate_distributions() {
        let mut builder = Builder::new(&AnalysisMode::PerContest).unwrap();
        builder.add_ballot(1, &names(&["X", "Y"])).unwrap();
        builder.add_ballot(2, &names(&["X"])).unwrap();
        builder.add_ballot(3, &names(&["X", "Y", "Z"])).unwrap();
        builder.add_ballot(4, &names(&["Y", "Z"])).unwrap();
        let p = builder.run().unwrap().patterns.unwrap();
        let x = p.candidate_approval_distributions.get("X").unwrap();
        assert_eq!(x.get(&1), Some(&1));
        assert_eq!(x.get(&2), Some(&1));
        assert_eq!(x.get(&3), Some(&1));
        let z = p.candidate_approval_distributions.get("Z").unwrap();
        assert_eq!(z.get(&1), None);
        assert_eq!(z.get(&2), Some(&1));
        assert_eq!(z.get(&3), Some(&1));
    }

    #[test]
    fn not_enough_ballots() {
        let mut builder = Builder::new(&AnalysisMode::PerContest).unwrap();
        builder.add_ballot(1, &names(&["A", "B"])).unwrap();
        builder.add_ballot(2, &[]).unwrap();
        let res = builder.run().unwrap();
        assert!(res.is_empty());
        assert_eq!(res.candidate_approvals.get("A"), Some(&1));
    }

    #[test]
    fn not_enough_candidates() {
        let mut builder = Builder::new(&AnalysisMode::ElectionWide).unwrap();
        builder.add_ballot(1, &names(&["A"])).unwrap();
        builder.add_ballot(2, &names(&["A"])).unwrap();
        builder.add_ballot(3, &names(&["A"])).unwrap();
        let res = builder.run().unwrap();
        assert!(res.co_approvals.is_empty());
        assert!(res.patterns.is_none());
    }

    #[test]
    fn zero_denominator_pairs_depend_on_mode() {
        let cands = names(&["A", "B", "C"]);
        let ballots: Vec<(BallotId, Vec<String>)> =
            vec![(1, names(&["A", "B"])), (2, names(&["A"]))];

        let mut per_contest = Builder::new(&AnalysisMode::PerContest)
            .unwrap()
            .candidates(&cands)
            .unwrap();
        let mut election_wide = Builder::new(&AnalysisMode::ElectionWide)
            .unwrap()
            .candidates(&cands)
            .unwrap();
        for (id, l) in ballots.iter() {
            per_contest.add_ballot(*id, l).unwrap();
            election_wide.add_ballot(*id, l).unwrap();
        }

        let res = per_contest.run().unwrap();
        assert_eq!(res.co_approvals.len(), 4);
        assert!(pair(&res, "C", "A").is_none());
        assert!(pair(&res, "A", "C").is_some());

        let res = election_wide.run().unwrap();
        assert_eq!(res.co_approvals.len(), 6);
        let ca = pair(&res, "C", "A").unwrap();
        assert_eq!(ca.co_approval_count, 0);
        assert_close(ca.co_approval_rate, 0.0);
    }

    #[test]
    fn cross_contest_behavior() {
        let mayor_a = composite_key("Ann", "Mayor");
        let mayor_b = composite_key("Bob", "Mayor");
        let ward_c = composite_key("Cy", "Ward 3");
        let mut builder = Builder::new(&AnalysisMode::ElectionWide).unwrap();
        builder
            .add_ballot(1, &[mayor_a.clone(), mayor_b.clone()])
            .unwrap();
        builder
            .add_ballot(2, &[mayor_a.clone(), ward_c.clone()])
            .unwrap();
        builder.add_ballot(3, &[mayor_b, ward_c]).unwrap();
        builder.add_ballot(4, &[mayor_a]).unwrap();
        let p = builder.run().unwrap().patterns.unwrap();
        let cc = p.cross_contest.unwrap();
        assert_eq!(cc.multi_approval_voters, 1);
        assert_eq!(cc.single_approval_only_voters, 3);
        assert_close(cc.multi_approval_rate, 25.0);
        assert_close(cc.single_approval_only_rate, 75.0);
    }

    #[test]
    fn per_contest_has_no_cross_contest() {
        let mut builder = Builder::new(&AnalysisMode::PerContest).unwrap();
        builder.add_ballot(1, &names(&["A", "B"])).unwrap();
        builder.add_ballot(2, &names(&["A"])).unwrap();
        let p = builder.run().unwrap().patterns.unwrap();
        assert!(p.cross_contest.is_none());
    }

    #[test]
    fn contest_suffix() {
        assert_eq!(contest_of_key("Ann Lee (Mayor)"), Some("Mayor"));
        assert_eq!(
            contest_of_key("Ann \"Red\" (Jr) Lee (Alderman Ward 3)"),
            Some("Alderman Ward 3")
        );
        assert_eq!(contest_of_key("Ann Lee"), None);
    }

    #[test]
    fn registered_candidates_are_checked() {
        let res = Builder::new(&AnalysisMode::PerContest)
            .unwrap()
            .candidates(&names(&["A", "A"]));
        assert_eq!(
            res.err(),
            Some(AnalysisErrors::DuplicateCandidate("A".to_string()))
        );
        let mut builder = Builder::new(&AnalysisMode::PerContest).unwrap();
        assert_eq!(
            builder.add_approval(1, ""),
            Err(AnalysisErrors::EmptyCandidateName)
        );
    }

    #[test]
    fn patterns_serialize_with_stable_keys() {
        let mut builder = Builder::new(&AnalysisMode::PerContest).unwrap();
        builder.add_ballot(1, &names(&["B", "A"])).unwrap();
        builder.add_ballot(2, &names(&["A"])).unwrap();
        let p = builder.run().unwrap().patterns.unwrap();
        let js = serde_json::to_string(&p.approval_distribution).unwrap();
        assert_eq!(js, r#"{"1":1,"2":1}"#);
        let js = serde_json::to_string(&p.candidate_approval_distributions).unwrap();
        assert_eq!(js, r#"{"A":{"1":1,"2":1},"B":{"2":1}}"#);
        let back: VotingPatterns =
            serde_json::from_str(&serde_json::to_string(&p).unwrap()).unwrap();
        assert_eq!(back, p);
    }
}

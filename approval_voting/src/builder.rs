pub use crate::config::*;

/// A builder for collecting the approvals of ballots.
///
/// Approvals may be added one at a time, for instance while streaming the
/// rows of a database query, or one ballot at a time.
///
/// ```
/// pub use approval_voting::builder::Builder;
/// pub use approval_voting::AnalysisMode;
/// # use approval_voting::AnalysisErrors;
///
/// let mut builder = Builder::new(&AnalysisMode::PerContest)?
///     .candidates(&["Anna".to_string(), "Bob".to_string(), "Clara".to_string()])?;
///
/// builder.add_ballot(1, &["Anna".to_string(), "Clara".to_string()])?;
/// builder.add_approval(2, "Bob")?;
/// builder.add_approval(2, "Anna")?;
///
/// let analysis = builder.run()?;
/// assert_eq!(analysis.patterns.unwrap().total_ballots, 2);
///
/// # Ok::<(), AnalysisErrors>(())
/// ```
pub struct Builder {
    pub(crate) _mode: AnalysisMode,
    pub(crate) _candidates: Option<Vec<String>>,
    pub(crate) _ballots: ApprovalBallots,
}

impl Builder {
    pub fn new(mode: &AnalysisMode) -> Result<Builder, AnalysisErrors> {
        Ok(Builder {
            _mode: *mode,
            _candidates: None,
            _ballots: ApprovalBallots::default(),
        })
    }

    /// Registers the candidates of the contest.
    ///
    /// Registered candidates are part of the analysis even when no ballot approves them.
    pub fn candidates(self, cands: &[String]) -> Result<Builder, AnalysisErrors> {
        let mut seen: Vec<&String> = Vec::new();
        for name in cands.iter() {
            if name.is_empty() {
                return Err(AnalysisErrors::EmptyCandidateName);
            }
            if seen.contains(&name) {
                return Err(AnalysisErrors::DuplicateCandidate(name.clone()));
            }
            seen.push(name);
        }
        Ok(Builder {
            _mode: self._mode,
            _candidates: Some(cands.to_vec()),
            _ballots: self._ballots,
        })
    }

    /// Adds a ballot with all its approvals.
    ///
    /// The ballot is recorded even if it does not approve anyone. Adding the same
    /// ballot again merges the approvals.
    pub fn add_ballot(&mut self, ballot_id: BallotId, approvals: &[String]) -> Result<(), AnalysisErrors> {
        if approvals.iter().any(|s| s.is_empty()) {
            return Err(AnalysisErrors::EmptyCandidateName);
        }
        let entry = self._ballots.ballots.entry(ballot_id).or_default();
        entry.extend(approvals.iter().cloned());
        Ok(())
    }

    /// Records that a ballot approved a candidate.
    pub fn add_approval(&mut self, ballot_id: BallotId, candidate: &str) -> Result<(), AnalysisErrors> {
        if candidate.is_empty() {
            return Err(AnalysisErrors::EmptyCandidateName);
        }
        self._ballots
            .ballots
            .entry(ballot_id)
            .or_default()
            .insert(candidate.to_string());
        Ok(())
    }

    pub fn ballots(&self) -> &ApprovalBallots {
        &self._ballots
    }

    pub fn run(&self) -> Result<ApprovalAnalysis, AnalysisErrors> {
        crate::run_approval_stats(&self._ballots, &self._mode, &self._candidates)
    }
}

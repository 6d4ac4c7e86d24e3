use rand::seq::SliceRandom;
use rand::Rng;

use super::candidate_test::host_candidate;
use super::*;
use crate::error::Result;

fn pair_with_priorities(local: u32, remote: u32, controlling: bool) -> Result<CandidatePair> {
    let mut l = host_candidate("10.0.0.1:2000", 1)?;
    l.priority_override = local;
    let mut r = host_candidate("10.0.0.2:3000", 1)?;
    r.priority_override = remote;
    Ok(CandidatePair::new(Arc::new(l), Arc::new(r), controlling))
}

fn rfc_pair_priority(g: u64, d: u64) -> u64 {
    // 2^32*MIN(G,D) + 2*MAX(G,D) + (G>D?1:0), the section 5.7.2 formula.
    ((1u64 << 32) - 1) * g.min(d) + 2 * g.max(d) + u64::from(g > d)
}

#[test]
fn test_pair_priority_matches_rfc_formula() -> Result<()> {
    for (g, d) in [(100u32, 200u32), (200, 100), (1, 1), (0, 5), (5, 0)] {
        let p = pair_with_priorities(g, d, true)?;
        assert_eq!(p.priority(), rfc_pair_priority(g as u64, d as u64));

        // The controlled view swaps G and D.
        let p = pair_with_priorities(g, d, false)?;
        assert_eq!(p.priority(), rfc_pair_priority(d as u64, g as u64));
    }
    Ok(())
}

#[test]
fn test_pair_priority_ordering_is_total_and_rfc_consistent() -> Result<()> {
    // Random candidate sets of bounded size: sorting pairs by the
    // engine's priority must agree with the RFC formula everywhere.
    let mut rng = rand::thread_rng();
    for _ in 0..20 {
        let n = rng.gen_range(2..=16);
        let mut pairs = vec![];
        for _ in 0..n {
            let g: u32 = rng.gen();
            let d: u32 = rng.gen();
            pairs.push((pair_with_priorities(g, d, true)?, g as u64, d as u64));
        }

        pairs.shuffle(&mut rng);
        let mut by_engine: Vec<u64> = pairs.iter().map(|(p, _, _)| p.priority()).collect();
        by_engine.sort_unstable();

        let mut by_rfc: Vec<u64> = pairs
            .iter()
            .map(|(_, g, d)| rfc_pair_priority(*g, *d))
            .collect();
        by_rfc.sort_unstable();

        assert_eq!(by_engine, by_rfc);
    }
    Ok(())
}

#[test]
fn test_pair_state_lifecycle() -> Result<()> {
    let p = pair_with_priorities(10, 20, true)?;
    assert_eq!(p.state(), CandidatePairState::Frozen);

    p.set_state(CandidatePairState::Waiting);
    assert_eq!(p.state(), CandidatePairState::Waiting);
    p.set_state(CandidatePairState::InProgress);
    p.set_state(CandidatePairState::Succeeded);
    assert_eq!(p.state(), CandidatePairState::Succeeded);
    assert!(!p.is_nominated());
    Ok(())
}

#[test]
fn test_pair_equality_by_candidates() -> Result<()> {
    let a = pair_with_priorities(10, 20, true)?;
    let b = pair_with_priorities(10, 20, true)?;
    assert_eq!(a, b);

    let c = CandidatePair::new(
        Arc::new(host_candidate("10.0.0.9:2000", 1)?),
        Arc::new(host_candidate("10.0.0.2:3000", 1)?),
        true,
    );
    assert!(a != c);
    Ok(())
}

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::domain::variant::VariantId;

/// Builds the working candidate pool for one request.
///
/// Deduplicates `candidates` (first occurrence wins), drops `exclude`,
/// shuffles uniformly with `rng`, caps at `target`, then tops up from
/// `fallback` with ids that are neither excluded nor already present.
pub fn build_candidate_pool<R>(
    candidates: &[VariantId],
    exclude: Option<&VariantId>,
    target: usize,
    fallback: &[VariantId],
    rng: &mut R,
) -> Vec<VariantId>
where
    R: Rng + ?Sized,
{
    let mut seen = HashSet::new();
    let mut pool: Vec<VariantId> = candidates
        .iter()
        .filter(|id| !id.as_str().is_empty() && Some(*id) != exclude)
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect();

    pool.shuffle(rng);
    pool.truncate(target);

    if pool.len() < target {
        let mut present: HashSet<VariantId> = pool.iter().cloned().collect();
        let missing = target - pool.len();
        let extra: Vec<VariantId> = fallback
            .iter()
            .filter(|id| !id.as_str().is_empty() && Some(*id) != exclude)
            .filter(|id| present.insert((*id).clone()))
            .take(missing)
            .cloned()
            .collect();
        pool.extend(extra);
    }

    pool
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::build_candidate_pool;
    use crate::domain::variant::VariantId;

    fn ids(values: &[&str]) -> Vec<VariantId> {
        values.iter().map(|value| VariantId::new(*value)).collect()
    }

    #[test]
    fn excludes_current_and_deduplicates() {
        let mut rng = StdRng::seed_from_u64(7);
        let current = VariantId::new("A");

        let pool = build_candidate_pool(
            &ids(&["A", "B", "B", "C", "A", ""]),
            Some(&current),
            10,
            &[],
            &mut rng,
        );

        let unique: HashSet<&VariantId> = pool.iter().collect();
        assert_eq!(pool.len(), 2);
        assert_eq!(unique.len(), 2);
        assert!(!pool.contains(&current));
    }

    #[test]
    fn caps_at_target_without_touching_fallback() {
        let mut rng = StdRng::seed_from_u64(11);
        let candidates: Vec<VariantId> =
            (0..80).map(|index| VariantId::new(format!("c{index}"))).collect();

        let pool = build_candidate_pool(&candidates, None, 30, &ids(&["F1"]), &mut rng);

        assert_eq!(pool.len(), 30);
        assert!(!pool.contains(&VariantId::new("F1")));
    }

    #[test]
    fn tops_up_from_fallback_after_shuffled_candidates() {
        let mut rng = StdRng::seed_from_u64(3);
        let current = VariantId::new("F2");

        let pool = build_candidate_pool(
            &ids(&["A", "B"]),
            Some(&current),
            5,
            &ids(&["B", "F1", "F2", "F3", "F1", "F4", "F5"]),
            &mut rng,
        );

        let head: HashSet<&str> = pool[..2].iter().map(VariantId::as_str).collect();
        assert_eq!(head, HashSet::from(["A", "B"]));
        let tail: Vec<&str> = pool[2..].iter().map(VariantId::as_str).collect();
        assert_eq!(tail, vec!["F1", "F3", "F4"]);
    }

    #[test]
    fn same_seed_gives_same_order() {
        let candidates = ids(&["A", "B", "C", "D", "E", "F"]);
        let first = build_candidate_pool(&candidates, None, 6, &[], &mut StdRng::seed_from_u64(42));
        let second =
            build_candidate_pool(&candidates, None, 6, &[], &mut StdRng::seed_from_u64(42));
        assert_eq!(first, second);
    }

    #[test]
    fn leading_position_is_not_biased() {
        let candidates = ids(&["A", "B", "C", "D"]);
        let mut counts: HashMap<String, usize> = HashMap::new();

        for seed in 0..2_000 {
            let pool =
                build_candidate_pool(&candidates, None, 4, &[], &mut StdRng::seed_from_u64(seed));
            *counts.entry(pool[0].0.clone()).or_default() += 1;
        }

        for id in ["A", "B", "C", "D"] {
            let hits = counts.get(id).copied().unwrap_or(0);
            assert!((400..=600).contains(&hits), "{id} led {hits} of 2000 pools");
        }
    }
}

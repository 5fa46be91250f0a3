//! Chunking of phase entry lists into bounded uploads.

use super::types::{Phase, Pipeline, PipelineChunk, PipelineEntry};

/// Split one phase's entries into chunks of at most `max_size` entries.
///
/// Entry `i` lands in chunk `i / max_size + 1`. A gate group counts as one
/// entry.
pub fn chunk(phase: Phase, entries: &[PipelineEntry], max_size: usize) -> Vec<PipelineChunk> {
    entries
        .chunks(max_size.max(1))
        .enumerate()
        .map(|(i, steps)| PipelineChunk {
            phase,
            index: i + 1,
            steps: steps.to_vec(),
        })
        .collect()
}

/// Chunk every phase of a pipeline, build phase first.
pub fn chunk_pipeline(pipeline: &Pipeline, max_size: usize) -> Vec<PipelineChunk> {
    Phase::ALL
        .iter()
        .flat_map(|&phase| chunk(phase, pipeline.entries(phase), max_size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Step;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn entries(n: usize) -> Vec<PipelineEntry> {
        (0..n)
            .map(|i| {
                PipelineEntry::Step(Step {
                    label: format!("s{i}"),
                    key: format!("k{i}"),
                    command: "true".to_string(),
                    depends_on: BTreeSet::new(),
                    skip_reason: None,
                    phase: Phase::Build,
                    branches: None,
                })
            })
            .collect()
    }

    #[test]
    fn test_five_entries_max_two() {
        let chunks = chunk(Phase::Build, &entries(5), 2);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.steps.len()).collect();
        let indices: Vec<usize> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(chunks[2].steps[0].key(), "k4");
    }

    #[test]
    fn test_empty_phase_has_no_chunks() {
        assert!(chunk(Phase::Release, &[], 10).is_empty());
    }

    #[test]
    fn test_chunk_pipeline_orders_phases() {
        let pipeline = Pipeline {
            build: entries(3),
            release: entries(1),
        };
        let chunks = chunk_pipeline(&pipeline, 2);
        let names: Vec<String> = chunks.iter().map(|c| c.file_name()).collect();
        assert_eq!(
            names,
            vec!["build-chunk-1.json", "build-chunk-2.json", "release-chunk-1.json"]
        );
    }

    proptest! {
        #[test]
        fn prop_chunks_preserve_order_and_bound(n in 0usize..60, max in 1usize..20) {
            let input = entries(n);
            let chunks = chunk(Phase::Build, &input, max);
            prop_assert_eq!(chunks.len(), n.div_ceil(max));
            for (i, c) in chunks.iter().enumerate() {
                prop_assert_eq!(c.index, i + 1);
                prop_assert!(!c.steps.is_empty() && c.steps.len() <= max);
            }
            let flat: Vec<PipelineEntry> = chunks.into_iter().flat_map(|c| c.steps).collect();
            prop_assert_eq!(flat, input);
        }
    }
}

use ftsengine::config::MergeConfig;
use ftsengine::segment::{bm25_term_score, idf};
use ftsengine::{
    Bm25Params, DictionaryKind, EngineConfig, PostingProfile, RetrievalMode, SegmentIndex,
};

const PROFILES: [PostingProfile; 3] = [
    PostingProfile::Speed,
    PostingProfile::Balanced,
    PostingProfile::Compact,
];

fn create_config() -> EngineConfig {
    EngineConfig::default()
        .with_merge(MergeConfig {
            enabled: false,
            ..Default::default()
        })
        .with_worker_threads(2)
}

fn index_fixture(index: &SegmentIndex) {
    index.add_document("1", "the cat sat").unwrap();
    index.add_document("2", "the cat ran").unwrap();
    index.add_document("3", "a dog ran").unwrap();
}

fn keys(index: &SegmentIndex, query: &str) -> Vec<String> {
    index
        .search(query, 10, 0)
        .unwrap()
        .hits
        .into_iter()
        .map(|h| h.key)
        .collect()
}

#[test]
fn golden_conjunctive_scenario() {
    for profile in PROFILES {
        for dictionary in [DictionaryKind::Fst, DictionaryKind::Hash] {
            let config = create_config()
                .with_profile(profile)
                .with_dictionary(dictionary);
            let index = SegmentIndex::open(config).unwrap();
            index_fixture(&index);

            // Buffered and sealed data rank identically
            assert_eq!(keys(&index, "cat"), vec!["1", "2"]);
            index.build().unwrap();
            assert_eq!(keys(&index, "cat"), vec!["1", "2"]);
            assert!(keys(&index, "cat dog").is_empty(), "{:?}", profile);
        }
    }
}

#[test]
fn golden_disjunctive_scenario() {
    let index =
        SegmentIndex::open(create_config().with_retrieval(RetrievalMode::Or)).unwrap();
    index_fixture(&index);
    index.build().unwrap();

    let outcome = index.search("cat dog", 10, 0).unwrap();
    assert_eq!(outcome.total, 3);
    // "dog" is rarer than "cat", so its single document ranks first
    assert_eq!(outcome.hits[0].key, "3");
}

#[test]
fn no_matching_terms_is_empty_not_error() {
    let index = SegmentIndex::open(create_config()).unwrap();
    assert!(index.search("anything", 10, 0).unwrap().hits.is_empty());

    index_fixture(&index);
    index.build().unwrap();
    let outcome = index.search("zebra", 10, 0).unwrap();
    assert!(outcome.hits.is_empty());
    assert_eq!(outcome.total, 0);
    assert!(index.search("   ", 10, 0).unwrap().hits.is_empty());
}

#[test]
fn count_equals_distinct_ids() {
    let index = SegmentIndex::open(create_config().with_flush_threshold(3)).unwrap();
    for i in 0..10 {
        index.add_document(&format!("doc-{}", i % 7), "repeated text").unwrap();
    }
    index.build().unwrap();
    assert_eq!(index.count(), 7);
    assert_eq!(index.search("repeated", 100, 0).unwrap().total, 7);
}

#[test]
fn bm25_monotonic_in_term_frequency() {
    let params = Bm25Params::default();
    let weight = idf(10, 1_000);
    let mut previous = 0.0;
    for tf in 1..200 {
        let score = bm25_term_score(weight, tf as f32, 120.0, 100.0, &params);
        assert!(score >= previous, "tf {} scored {} < {}", tf, score, previous);
        previous = score;
    }
}

#[test]
fn equal_scores_order_by_doc_id() {
    let index = SegmentIndex::open(create_config().with_flush_threshold(4)).unwrap();
    for key in ["k0", "k1", "k2", "k3", "k4", "k5", "k6", "k7", "k8", "k9"] {
        index.add_document(key, "identical words here").unwrap();
    }
    index.build().unwrap();

    let expected: Vec<String> = (0..10).map(|i| format!("k{}", i)).collect();
    for _ in 0..3 {
        assert_eq!(keys(&index, "identical words"), expected);
    }
}

#[test]
fn pagination_partitions_ranked_list() {
    for profile in PROFILES {
        let index = SegmentIndex::open(create_config().with_profile(profile).with_flush_threshold(7))
            .unwrap();
        for i in 0..25 {
            let text = format!("{} {}", "alpha ".repeat(i % 5 + 1), "filler ".repeat(i % 3));
            index.add_document(&format!("d{}", i), &text).unwrap();
        }

        let full = index.search("alpha", 100, 0).unwrap();
        assert_eq!(full.total, 25);

        let mut paged = Vec::new();
        let mut offset = 0;
        loop {
            let page = index.search("alpha", 2, offset).unwrap();
            assert_eq!(page.total, 25);
            if page.hits.is_empty() {
                break;
            }
            paged.extend(page.hits);
            offset += 2;
        }
        assert_eq!(paged, full.hits);
    }
}

#[test]
fn profiles_rank_identically() {
    let mut rankings = Vec::new();
    for profile in PROFILES {
        let index = SegmentIndex::open(create_config().with_profile(profile).with_flush_threshold(50))
            .unwrap();
        for i in 0..400 {
            let text = format!(
                "common {} {} rare{}",
                "alpha ".repeat(i % 4),
                "beta ".repeat(i % 7),
                i % 13
            );
            index.add_document(&i.to_string(), &text).unwrap();
        }
        index.build().unwrap();
        let outcome = index.search("common alpha beta", 20, 0).unwrap();
        rankings.push(
            outcome
                .hits
                .into_iter()
                .map(|h| (h.key, h.score))
                .collect::<Vec<_>>(),
        );
    }

    for ranking in &rankings[1..] {
        assert_eq!(ranking.len(), rankings[0].len());
        for (a, b) in ranking.iter().zip(&rankings[0]) {
            assert_eq!(a.0, b.0);
            assert!((a.1 - b.1).abs() < 1e-5);
        }
    }
}

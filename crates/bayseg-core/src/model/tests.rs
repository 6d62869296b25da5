use super::*;
use crate::config::HyperSchedule;
use crate::corpus::CorpusOptions;

fn config(max_word_length: usize, seed: u64) -> ModelConfig {
    ModelConfig {
        theta: 2.0,
        d: 0.5,
        gamma_a: 1.0,
        gamma_b: 1.0,
        beta_a: 1.0,
        beta_b: 1.0,
        alpha: 1.0,
        beta: 1.0,
        max_ngram: 2,
        max_word_length,
        pos_size: 3,
        vocab_size: 256,
        max_sentence_length: 64,
        seed: Some(seed),
    }
}

fn corpus(lines: &[&str]) -> Corpus {
    Corpus::from_lines(
        lines,
        &CorpusOptions {
            lowercase: true,
            max_sentence_length: 64,
        },
    )
}

fn options() -> TrainOptions {
    TrainOptions {
        threads: 2,
        batch_size: 2,
        schedule: HyperSchedule::Batch,
        cancel: None,
    }
}

fn snapshot(model: &Model) -> String {
    serde_json::to_string(&model.to_record()).unwrap()
}

#[test]
fn test_aiueo_one_epoch() {
    let mut model = Model::new(ModelKind::Npylm, config(3, 1)).unwrap();
    let mut c = corpus(&["aiueo"]);
    model.initialize(&mut c).unwrap();
    assert!(!model.is_empty());

    model.train_word_segmentation(&mut c, &options()).unwrap();
    model.check().unwrap();
    let words = c.sentences()[0].words();
    assert_eq!(words.concat(), "aiueo");
    assert!(words.iter().all(|w| (1..=3).contains(&w.chars().count())));

    let results = model.test_word_segmentation(&["aiueo"], 1).unwrap();
    assert_eq!(results.len(), 1);
    let decoded = results.word_sequence(0).unwrap();
    assert_eq!(decoded.concat(), "aiueo");
    assert!(decoded.iter().all(|w| w.chars().count() <= 3));
}

#[test]
fn test_single_character_sentence() {
    for kind in [ModelKind::Npylm, ModelKind::Pyhsmm] {
        let mut model = Model::new(kind, config(4, 2)).unwrap();
        let mut c = corpus(&["a"]);
        model.initialize(&mut c).unwrap();
        model.train(&mut c, &options()).unwrap();
        assert_eq!(c.sentences()[0].words(), vec!["a"]);
        let results = model.test_word_segmentation(&["a"], 1).unwrap();
        assert_eq!(results.word_sequence(0).unwrap(), vec!["a"]);
    }
}

#[test]
fn test_inference_is_read_only() {
    for kind in [ModelKind::Npylm, ModelKind::Pyhsmm] {
        let mut model = Model::new(kind, config(3, 3)).unwrap();
        let mut c = corpus(&["abcabc", "cabcab"]);
        model.initialize(&mut c).unwrap();
        model.train(&mut c, &options()).unwrap();

        let before = snapshot(&model);
        let texts = c.texts();
        model.test_word_segmentation(&texts, 2).unwrap();
        model.sample_word_segmentation(&texts, 2, 7).unwrap();
        model.log_likelihood("abcabc").unwrap();
        assert_eq!(snapshot(&model), before);
    }
}

#[test]
fn test_seeded_training_is_reproducible() {
    let run = || {
        let mut model = Model::new(ModelKind::Pyhsmm, config(3, 4)).unwrap();
        let mut c = corpus(&["きょうはいいてんき", "いいてんきですね", "きょうは"]);
        model.initialize(&mut c).unwrap();
        for _ in 0..3 {
            model.train(&mut c, &options()).unwrap();
        }
        (snapshot(&model), c)
    };
    let (a, ca) = run();
    let (b, cb) = run();
    assert_eq!(a, b);
    assert_eq!(ca, cb);
}

#[test]
fn test_seeded_sampling_decode() {
    let mut model = Model::new(ModelKind::Npylm, config(3, 5)).unwrap();
    let mut c = corpus(&["abcabc", "abab"]);
    model.initialize(&mut c).unwrap();
    let texts = c.texts();
    let a = model.sample_word_segmentation(&texts, 1, 11).unwrap();
    let b = model.sample_word_segmentation(&texts, 3, 11).unwrap();
    for i in 0..texts.len() {
        assert_eq!(a.word_sequence(i), b.word_sequence(i));
        assert_eq!(a.word_sequence(i).unwrap().concat(), texts[i]);
    }
}

#[test]
fn test_training_mode_fixed_by_kind() {
    let mut npylm = Model::new(ModelKind::Npylm, config(3, 6)).unwrap();
    let mut c = corpus(&["abc"]);
    npylm.initialize(&mut c).unwrap();
    let err = npylm
        .train_word_segmentation_and_pos_tagging(&mut c, &options())
        .unwrap_err();
    assert!(matches!(err, SegError::Configuration { ref field, .. } if field == "kind"));

    let mut pyhsmm = Model::new(ModelKind::Pyhsmm, config(3, 6)).unwrap();
    let mut c = corpus(&["abc"]);
    pyhsmm.initialize(&mut c).unwrap();
    assert!(pyhsmm.train_word_segmentation(&mut c, &options()).is_err());
}

#[test]
fn test_invalid_config_fails_at_construction() {
    let mut c = config(3, 7);
    c.d = 1.5;
    assert!(matches!(
        Model::new(ModelKind::Npylm, c),
        Err(SegError::Configuration { .. })
    ));
    let mut c = config(3, 7);
    c.pos_size = 0;
    assert!(Model::new(ModelKind::Pyhsmm, c).is_err());
}

#[test]
fn test_inference_input_errors() {
    let model = Model::new(ModelKind::Npylm, config(3, 8)).unwrap();
    assert!(matches!(
        model.test_word_segmentation(&["ab", ""], 1),
        Err(SegError::Input(_))
    ));
    let long = "a".repeat(65);
    assert!(model.test_word_segmentation(&[long.as_str()], 1).is_err());
    assert!(model.test_word_segmentation(&["ab"], 0).is_err());
}

#[test]
fn test_tags_only_for_pyhsmm() {
    let mut model = Model::new(ModelKind::Pyhsmm, config(3, 9)).unwrap();
    let mut c = corpus(&["abcabc", "bcab"]);
    model.initialize(&mut c).unwrap();
    model.train(&mut c, &options()).unwrap();
    let results = model.test_word_segmentation(&["abcabc"], 1).unwrap();
    let words = results.word_sequence(0).unwrap();
    let tags = results.tag_sequence(0).unwrap();
    assert_eq!(words.len(), tags.len());
    assert!(tags.iter().all(|&t| t < 3));

    let npylm = Model::new(ModelKind::Npylm, config(3, 9)).unwrap();
    let results = npylm.test_word_segmentation(&["abc"], 1).unwrap();
    assert!(results.tag_sequence(0).is_none());
    assert!(results.word_sequence(1).is_none());
}

#[test]
fn test_scores_order_viterbi_sample_marginal() {
    let mut model = Model::new(ModelKind::Pyhsmm, config(3, 10)).unwrap();
    let mut c = corpus(&["abcabc", "cabca", "bcab"]);
    model.initialize(&mut c).unwrap();
    for _ in 0..2 {
        model.train(&mut c, &options()).unwrap();
    }
    let texts = c.texts();
    let best = model.test_word_segmentation(&texts, 2).unwrap();
    let sampled = model.sample_word_segmentation(&texts, 2, 3).unwrap();

    let best_score = model.test_score(&best).unwrap();
    let sampled_score = model.test_score(&sampled).unwrap();
    assert!(best_score.per_sentence.is_finite() && best_score.per_sentence > 0.0);
    assert!(best_score.per_sentence <= sampled_score.per_sentence + 1e-9);

    for (i, text) in texts.iter().enumerate() {
        let path = best.log_probability(i).unwrap();
        assert!(model.log_likelihood(text).unwrap() >= path - 1e-9);
    }
}

#[test]
fn test_report_lists_every_model() {
    let npylm = Model::new(ModelKind::Npylm, config(3, 11)).unwrap();
    let report = npylm.report();
    let names: Vec<&str> = report.models.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["word", "char"]);
    assert_eq!(report.models[1].theta.len(), 5);

    let pyhsmm = Model::new(ModelKind::Pyhsmm, config(3, 11)).unwrap();
    let report = pyhsmm.report();
    assert_eq!(report.models.len(), 3 + 1 + 1 + 1);
    assert!(report.to_string().contains("word[eos]"));
}

#[test]
fn test_word_probability_query() {
    for kind in [ModelKind::Npylm, ModelKind::Pyhsmm] {
        let mut model = Model::new(kind, config(3, 12)).unwrap();
        let before = model.word_probability("ab", None, 0).unwrap();
        let mut c = corpus(&["ababab", "abab", "ab"]);
        model.initialize(&mut c).unwrap();
        for _ in 0..3 {
            model.train(&mut c, &options()).unwrap();
        }
        let seen = (0..model.scorer().num_states())
            .map(|s| model.word_probability("ab", None, s).unwrap())
            .fold(0.0, f64::max);
        assert!(seen > before);
        let p = model.word_probability("b", Some("a"), 0).unwrap();
        assert!(p > 0.0 && p < 1.0);

        assert!(matches!(model.word_probability("", None, 0), Err(SegError::Input(_))));
        assert!(model.word_probability("ab", None, 3).is_err());
    }
}

#[test]
fn test_decoding_keeps_caller_text() {
    let mut model = Model::new(ModelKind::Npylm, config(3, 13)).unwrap();
    let mut c = corpus(&["ABCabc"]);
    model.initialize(&mut c).unwrap();
    assert_eq!(c.texts(), vec!["abcabc"]);
    let results = model.test_word_segmentation(&["ABCabc"], 1).unwrap();
    assert_eq!(results.word_sequence(0).unwrap().concat(), "ABCabc");
}

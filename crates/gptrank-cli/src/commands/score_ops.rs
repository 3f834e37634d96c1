use std::path::Path;
use std::time::Instant;

use gptrank_core::neural::{BpeTokenizer, NeuralModel, QuantizedGpt2};
use gptrank_core::settings::settings;
use gptrank_core::{BatchScorer, ScorerConfig, Sequence, Tokenizer};

use super::{print_reports, SequenceReport};

fn open_model(model_file: &str) -> NeuralModel {
    eprintln!("Loading neural model from {model_file}...");
    let start = Instant::now();
    let model = die!(
        NeuralModel::open(Path::new(model_file)),
        "Error loading neural model: {}"
    );
    eprintln!("  Model loaded in {:.0}ms", start.elapsed().as_millis());
    eprintln!("  {}", model.model().config_summary());
    eprintln!("  vocabulary: {} tokens", model.tokenizer().vocab_size());
    model
}

fn open_scorer(model_file: &str) -> (BpeTokenizer, BatchScorer<QuantizedGpt2>) {
    open_model(model_file).into_scorer(ScorerConfig::from_settings(settings()))
}

pub fn score_cmd(model_file: &str, sentences: &[String], json: bool) {
    if sentences.is_empty() {
        eprintln!("No sentences to score.");
        return;
    }
    let (tokenizer, mut scorer) = open_scorer(model_file);

    let sequences: Vec<Sequence> = sentences
        .iter()
        .map(|s| Sequence::with_text(s.as_str(), tokenizer.encode(s)))
        .collect();

    let start = Instant::now();
    let trajectories = die!(
        scorer.try_score(&sequences, tokenizer.eos_id()),
        "Error scoring batch: {}"
    );
    let elapsed = start.elapsed();

    let reports: Vec<SequenceReport> = sequences
        .iter()
        .zip(&trajectories)
        .enumerate()
        .map(|(i, (seq, trajectory))| SequenceReport::new(i, seq, trajectory))
        .collect();
    print_reports(&reports, json);
    eprintln!("Latency: {:.0}ms", elapsed.as_millis());
}

pub fn predict_cmd(model_file: &str, text: &str) {
    let (tokenizer, mut scorer) = open_scorer(model_file);
    let tokens = tokenizer.encode(text);
    let (token, probability) = die!(scorer.predict_next(&tokens), "Error predicting: {}");
    println!("Context: {text}");
    println!(
        "Next:    {token} {:?} (p={probability:.4})",
        tokenizer.decode(&[token])
    );
}

pub fn generate_cmd(model_file: &str, text: &str, max_tokens: Option<usize>) {
    let (tokenizer, mut scorer) = open_scorer(model_file);
    let max_tokens = max_tokens.unwrap_or(scorer.config().max_tokens);
    let tokens = tokenizer.encode(text);

    let start = Instant::now();
    let generated = die!(
        scorer.greedy_continue(&tokens, max_tokens, tokenizer.eos_id()),
        "Error generating text: {}"
    );
    let elapsed = start.elapsed();

    let ids: Vec<u32> = generated.iter().map(|&(t, _)| t).collect();
    println!("Context:   {text}");
    println!("Generated: {}", tokenizer.decode(&ids));
    for (token, probability) in &generated {
        println!("  {token:>6} {:<16?} p={probability:.4}", tokenizer.decode(&[*token]));
    }
    println!("Latency: {:.0}ms", elapsed.as_millis());
}

pub fn nearest_cmd(model_file: &str, text: &str) {
    let model = open_model(model_file);
    let tokens = model.tokenizer().encode(text);
    let hits = die!(model.nearest_tokens(&tokens), "Error searching embeddings: {}");

    let mut recovered = 0;
    for (position, (token, hit)) in tokens.iter().zip(&hits).enumerate() {
        let ok = hit.index == *token as usize;
        recovered += usize::from(ok);
        println!(
            "{position:>4}: {token:>6} -> {:>6} score={:.3} confidence={:.4}{}",
            hit.index,
            hit.score,
            hit.confidence,
            if ok { "" } else { "  MISMATCH" }
        );
    }
    println!("Recovered {recovered}/{} tokens", tokens.len());
}

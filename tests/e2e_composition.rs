//! End-to-end tests for recursive composition, the depth ceiling, prediction
//! resolution across constructions, Hebbian weight adaptation and network lifecycle
//! (finish, reset, root marking).

use cln_rs::core::edge::MAX_WEIGHT;
use cln_rs::core::grammar::Grammar;
use cln_rs::core::network::{Network, NetworkParams};
use cln_rs::core::pattern::PatternGraphSpec;
use cln_rs::core::token::Token;
use pretty_assertions::assert_eq;

fn tokens(words: &[(&str, &str)]) -> Vec<Token> {
    words.iter().map(|(form, pos)| Token::new(*form, *pos)).collect()
}

// ============================================================================
// 1. A confirmed construction becomes evidence for a larger one
// ============================================================================

fn quantifier_grammar() -> Grammar {
    let mut grammar = Grammar::new();
    grammar
        .insert("pelo_menos", &PatternGraphSpec::literal_chain(&["pelo", "menos"]))
        .unwrap();
    grammar
        .insert(
            "quantified",
            &PatternGraphSpec::literal_chain(&["pelo_menos", "dez"]),
        )
        .unwrap();
    grammar
}

#[test]
fn confirmed_construction_feeds_higher_pattern() {
    let mut network = Network::new(quantifier_grammar(), NetworkParams::default());
    network
        .process_tokens(&tokens(&[
            ("pelo", "ADP"),
            ("menos", "ADV"),
            ("dez", "NUM"),
        ]))
        .unwrap();

    let names: Vec<&str> = network.confirmed().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["pelo_menos", "quantified"]);

    let quantified = &network.confirmed()[1];
    assert_eq!(quantified.span, (0, 2));
    assert_eq!(quantified.depth, 1);
}

#[test]
fn later_construction_resolves_earlier_prediction() {
    // The outer pattern starts first and waits for the inner construction by name.
    let mut grammar = Grammar::new();
    grammar
        .insert("pelo_menos", &PatternGraphSpec::literal_chain(&["pelo", "menos"]))
        .unwrap();
    grammar
        .insert(
            "comeca_quantificado",
            &PatternGraphSpec::literal_chain(&["começa", "pelo_menos"]),
        )
        .unwrap();

    let mut network = Network::new(grammar, NetworkParams::default());
    network
        .process_tokens(&tokens(&[
            ("começa", "VERB"),
            ("pelo", "ADP"),
            ("menos", "ADV"),
        ]))
        .unwrap();

    let names: Vec<&str> = network.confirmed().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["pelo_menos", "comeca_quantificado"]);
    assert_eq!(network.confirmed()[1].span, (0, 2));
}

#[test]
fn nearest_prediction_wins_backward_resolution() {
    // Two columns expect the same construction; the one closest to it is resolved.
    let mut grammar = Grammar::new();
    grammar
        .insert("pelo_menos", &PatternGraphSpec::literal_chain(&["pelo", "menos"]))
        .unwrap();
    grammar
        .insert("x_pm", &PatternGraphSpec::literal_chain(&["x", "pelo_menos"]))
        .unwrap();

    let mut network = Network::new(grammar, NetworkParams::default());
    network
        .process_tokens(&tokens(&[
            ("x", "SYM"),
            ("x", "SYM"),
            ("pelo", "ADP"),
            ("menos", "ADV"),
        ]))
        .unwrap();

    let outer: Vec<_> = network
        .confirmed()
        .iter()
        .filter(|c| c.name == "x_pm")
        .collect();
    assert_eq!(outer.len(), 1);
    assert_eq!(outer[0].span, (1, 3));
}

// ============================================================================
// 2. Multi-level composition and the depth ceiling
// ============================================================================

fn nested_grammar() -> Grammar {
    let mut grammar = Grammar::new();
    grammar
        .insert("par", &PatternGraphSpec::literal_chain(&["um", "dois"]))
        .unwrap();
    grammar
        .insert("par_wrapper", &PatternGraphSpec::literal_chain(&["par"]))
        .unwrap();
    grammar
        .insert("outer_wrapper", &PatternGraphSpec::literal_chain(&["par_wrapper"]))
        .unwrap();
    grammar
}

#[test]
fn composition_cascades_through_levels() {
    let mut network = Network::new(nested_grammar(), NetworkParams::default());
    network
        .process_tokens(&tokens(&[("um", "NUM"), ("dois", "NUM")]))
        .unwrap();

    let names: Vec<&str> = network.confirmed().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["par", "par_wrapper", "outer_wrapper"]);

    let depths: Vec<u32> = network.confirmed().iter().map(|c| c.depth).collect();
    assert_eq!(depths, vec![0, 1, 2]);
}

#[test]
fn depth_ceiling_stops_the_cascade() {
    let params = NetworkParams {
        max_composition_depth: 1,
        ..NetworkParams::default()
    };
    let mut network = Network::new(nested_grammar(), params);
    network
        .process_tokens(&tokens(&[("um", "NUM"), ("dois", "NUM")]))
        .unwrap();

    let names: Vec<&str> = network.confirmed().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["par", "par_wrapper"]);
}

#[test]
fn zero_depth_allows_no_composition() {
    let params = NetworkParams {
        max_composition_depth: 0,
        ..NetworkParams::default()
    };
    let mut network = Network::new(quantifier_grammar(), params);
    network
        .process_tokens(&tokens(&[
            ("pelo", "ADP"),
            ("menos", "ADV"),
            ("dez", "NUM"),
        ]))
        .unwrap();

    let names: Vec<&str> = network.confirmed().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["pelo_menos"]);
}

// ============================================================================
// 3. Evidence consumption: one partial per evidence node
// ============================================================================

#[test]
fn word_and_pos_patterns_share_a_token() {
    // A literal pattern consumes the word node and a slot pattern consumes the
    // POS node of the same token, so both can start and confirm.
    let mut grammar = Grammar::new();
    grammar
        .insert("a_b", &PatternGraphSpec::literal_chain(&["alfa", "beta"]))
        .unwrap();
    grammar
        .insert("num_num", &PatternGraphSpec::slot_chain(&["NUM", "NUM"]))
        .unwrap();

    let mut network = Network::new(grammar, NetworkParams::default());
    network
        .process_tokens(&tokens(&[("alfa", "NUM"), ("beta", "NUM")]))
        .unwrap();

    let mut names: Vec<&str> = network.confirmed().iter().map(|c| c.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["a_b", "num_num"]);
}

#[test]
fn consumed_word_evidence_starts_only_the_first_pattern() {
    // Two literal patterns keyed on the same word compete for one evidence node;
    // the earlier-registered construction wins.
    let mut grammar = Grammar::new();
    grammar
        .insert("a_b", &PatternGraphSpec::literal_chain(&["alfa", "beta"]))
        .unwrap();
    grammar
        .insert(
            "a_b_c",
            &PatternGraphSpec::literal_chain(&["alfa", "beta", "gama"]),
        )
        .unwrap();

    let mut network = Network::new(grammar, NetworkParams::default());
    network.process_token(&Token::new("alfa", "SYM")).unwrap();

    let column = network.column(0).unwrap();
    assert_eq!(column.l5.partials().len(), 1);
}

// ============================================================================
// 4. Hebbian adaptation
// ============================================================================

#[test]
fn learning_strengthens_co_active_edges_up_to_the_cap() {
    let mut network = Network::new(quantifier_grammar(), NetworkParams::default());
    network
        .process_tokens(&tokens(&[
            ("pelo", "ADP"),
            ("menos", "ADV"),
            ("dez", "NUM"),
        ]))
        .unwrap();

    let snapshot = network.snapshot();
    assert!(snapshot.edges.iter().any(|e| e.weight > 1.0));
    assert!(snapshot.edges.iter().all(|e| e.weight <= MAX_WEIGHT));
}

#[test]
fn disabled_learning_leaves_weights_untouched() {
    let params = NetworkParams {
        learning_enabled: false,
        ..NetworkParams::default()
    };
    let mut network = Network::new(quantifier_grammar(), params);
    network
        .process_tokens(&tokens(&[
            ("pelo", "ADP"),
            ("menos", "ADV"),
            ("dez", "NUM"),
        ]))
        .unwrap();

    let snapshot = network.snapshot();
    assert!(snapshot.edges.iter().all(|e| (e.weight - 1.0).abs() < f64::EPSILON));
}

// ============================================================================
// 5. Lifecycle: finish, root marking, reset
// ============================================================================

#[test]
fn finish_marks_unconsumed_constructions_as_roots() {
    let mut network = Network::new(quantifier_grammar(), NetworkParams::default());
    network
        .process_tokens(&tokens(&[
            ("pelo", "ADP"),
            ("menos", "ADV"),
            ("dez", "NUM"),
        ]))
        .unwrap();

    // Both constructions are anchored at position 0; "quantified" consumed
    // "pelo_menos" but nothing consumed "quantified", so the column is a root.
    assert!(network.column(0).unwrap().is_root);
}

#[test]
fn consumed_only_column_is_not_a_root() {
    let mut grammar = Grammar::new();
    grammar
        .insert("pelo_menos", &PatternGraphSpec::literal_chain(&["pelo", "menos"]))
        .unwrap();
    grammar
        .insert(
            "comeca_quantificado",
            &PatternGraphSpec::literal_chain(&["começa", "pelo_menos"]),
        )
        .unwrap();

    let mut network = Network::new(grammar, NetworkParams::default());
    network
        .process_tokens(&tokens(&[
            ("começa", "VERB"),
            ("pelo", "ADP"),
            ("menos", "ADV"),
        ]))
        .unwrap();

    // The inner expression at position 1 was consumed by the outer pattern at 0.
    assert!(!network.column(1).unwrap().is_root);
    assert!(network.column(0).unwrap().is_root);
}

#[test]
fn reset_clears_state_for_a_fresh_sequence() {
    let mut network = Network::new(quantifier_grammar(), NetworkParams::default());
    network
        .process_tokens(&tokens(&[("pelo", "ADP"), ("menos", "ADV")]))
        .unwrap();
    assert_eq!(network.confirmed().len(), 1);

    network.reset();
    assert!(network.is_empty());
    assert!(network.confirmed().is_empty());
    assert!(network.arena().is_empty());

    network
        .process_tokens(&tokens(&[
            ("pelo", "ADP"),
            ("menos", "ADV"),
            ("dez", "NUM"),
        ]))
        .unwrap();
    assert_eq!(network.confirmed().len(), 2);
}

#[test]
fn population_activity_rises_at_the_active_column() {
    let mut network = Network::new(quantifier_grammar(), NetworkParams::default());
    network
        .process_tokens(&tokens(&[("pelo", "ADP"), ("menos", "ADV")]))
        .unwrap();

    let column = network.column(0).unwrap();
    let activity = column.activity();
    assert!(activity.l23 > 0.0);
    assert!(activity.l5 > 0.0);
}

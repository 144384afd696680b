//! This demo parses a short Portuguese sentence against a small construction grammar.
//! A fixed-expression bigram, a POS-based noun phrase and a clause built on top of it
//! are loaded, the tokens are fed in one by one, and the confirmed constructions with
//! their spans and composition depths are printed after each step.
//!
//! The sentence "ele passou pelo menos dez vezes" carries the fixed expression
//! "pelo menos" across positions 2-3, which the grammar confirms as a single unit.

use anyhow::Result;
use cln_rs::core::grammar::Grammar;
use cln_rs::core::network::{Network, NetworkParams};
use cln_rs::core::pattern::{PatternBuilder, PatternGraphSpec};
use cln_rs::core::token::Token;

fn main() -> Result<()> {
    println!("Building grammar...");

    let mut grammar = Grammar::new();

    grammar.insert(
        "pelo_menos",
        &PatternGraphSpec::literal_chain(&["pelo", "menos"]),
    )?;

    let mut noun_phrase = PatternBuilder::new();
    noun_phrase
        .slot("det", "DET", None)
        .slot("noun", "NOUN", None)
        .edge("start", "det")
        .edge("det", "noun")
        .edge("noun", "end");
    grammar.insert("noun_phrase", &noun_phrase.build())?;

    let mut quantified = PatternBuilder::new();
    quantified
        .literal("qualifier", "pelo_menos")
        .slot("amount", "NUM", None)
        .slot("unit", "NOUN", None)
        .edge("start", "qualifier")
        .edge("qualifier", "amount")
        .edge("amount", "unit")
        .edge("unit", "end");
    grammar.insert("quantified_phrase", &quantified.build())?;

    println!("Grammar holds {} constructions.", grammar.len());

    let tokens = [
        Token::new("ele", "PRON"),
        Token::new("passou", "VERB").with_lemma("passar"),
        Token::new("pelo", "ADP"),
        Token::new("menos", "ADV"),
        Token::new("dez", "NUM"),
        Token::new("vezes", "NOUN").with_lemma("vez"),
    ];

    let mut network = Network::new(grammar, NetworkParams::default());

    for token in &tokens {
        let position = network.process_token(token)?;
        println!(
            "[{position}] {:<8} {:<5} -> {} confirmed so far",
            token.form,
            token.upos,
            network.confirmed().len()
        );
    }

    network.finish();

    println!("\nConfirmed constructions:");
    for confirmed in network.confirmed() {
        println!(
            "  {:<20} span {}..{}  depth {}",
            confirmed.name, confirmed.span.0, confirmed.span.1, confirmed.depth
        );
    }

    println!("\nRoot columns:");
    for position in 0..network.len() {
        if let Some(column) = network.column(position) {
            if column.is_root {
                println!(
                    "  position {position} ({})",
                    column.construction_type.as_deref().unwrap_or("-")
                );
            }
        }
    }

    let snapshot = network.snapshot();
    println!(
        "\nFinal graph: {} nodes, {} edges.",
        snapshot.nodes.len(),
        snapshot.edges.len()
    );

    Ok(())
}

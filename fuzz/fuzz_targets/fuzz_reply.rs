//! Fuzz target for reply parsing and dispatch.
//!
//! Feeds arbitrary word lists through the parser and into a reconciling
//! mirror state; nothing may panic and the indexes must stay consistent.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mirror_sync::config::compile_pattern;
use mirror_sync::mirror::MirrorState;
use mirror_sync::routeros::sentence::{split_word, Reply, Sentence};

fuzz_target!(|sentences: Vec<Vec<String>>| {
    let Ok(pattern) = compile_pattern(None) else {
        return;
    };
    let mut state = MirrorState::new(pattern);
    let _ = state.enter_reconciling();

    for words in sentences {
        for word in &words {
            let _ = split_word(word);
        }
        let reply = Reply::parse(&words.into_iter().collect::<Sentence>());
        let _ = reply.message();
        let _ = state.dispatch(&reply);
        assert!(state.is_consistent());
    }
});

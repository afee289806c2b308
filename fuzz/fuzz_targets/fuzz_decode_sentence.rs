//! Fuzz target for the sentence decoder.
//!
//! Arbitrary bytes must never panic the decoder, and whatever decodes must
//! re-encode to exactly the bytes it was decoded from.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mirror_sync::routeros::codec::{decode_sentence, encode_sentence};

fuzz_target!(|data: &[u8]| {
    let Ok(Some((sentence, used))) = decode_sentence(data) else {
        return;
    };
    assert!(used <= data.len());

    // Lossy UTF-8 and non-minimal prefixes make the bytes differ; the words
    // must survive a second round.
    let encoded = encode_sentence(&sentence);
    let (again, again_used) = decode_sentence(&encoded)
        .expect("re-encoded sentence decodes")
        .expect("re-encoded sentence is complete");
    assert_eq!(again_used, encoded.len());
    assert_eq!(again.words(), sentence.words());
});

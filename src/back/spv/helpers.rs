use spirv::Word;

pub(super) fn bytes_to_words(bytes: &[u8]) -> Vec<Word> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = 0;
            for (index, byte) in chunk.iter().enumerate() {
                word |= (*byte as Word) << (index * 8);
            }
            word
        })
        .collect()
}

/// A string literal as SPIR-V sees it: UTF-8, null terminated, padded to
/// a word boundary.
pub(super) fn string_to_words(input: &str) -> Vec<Word> {
    let bytes = input.as_bytes();
    let mut words = bytes_to_words(bytes);

    if bytes.len() % 4 == 0 {
        // nul-termination
        words.push(0x0);
    }

    words
}

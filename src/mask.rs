use rand::Rng;

/// Draws a fresh masking key from the caller's generator.
///
/// Masking only obfuscates client payloads against naive intermediaries, so any generator
/// will do. It is always passed in explicitly; there is no process-wide source.
#[inline]
pub fn new_key<R: Rng + ?Sized>(rng: &mut R) -> [u8; 4] {
    rng.gen()
}

/// Mask/unmask a payload in place. Applying the same key twice restores the input.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let key = u32::from_ne_bytes(mask);

    let mut words = buf.chunks_exact_mut(4);
    for word in &mut words {
        let masked = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]) ^ key;
        word.copy_from_slice(&masked.to_ne_bytes());
    }

    // the tail starts at a multiple of 4, so it lines up with mask[0]
    for (byte, k) in words.into_remainder().iter_mut().zip(mask) {
        *byte ^= k;
    }
}

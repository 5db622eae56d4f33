//! The id → list-key codec.
//!
//! List keys are bit-reversed hashes: reversing the id bits makes the
//! list's natural sort order identical to the bucket-index order under any
//! prefix length, which is what lets the bucket index grow without moving
//! entries. The low bit of a key discriminates regular entries (1) from
//! bucket sentinels (0), so the sentinel key for a bucket is the infimum of
//! the keys that can land in it.

/// Number of hash bits `H`. Must be one greater than the number of bits
/// needed to express the largest id, since the list rejects duplicate
/// hashes and one extra bit separates id hashes from sentinel hashes.
pub const NUM_HASH_BITS: u32 = 57;

/// Largest id the map accepts: `2^H - 1`.
pub const MAX_ID: u64 = (1 << NUM_HASH_BITS) - 1;

/// Largest hash an id or sentinel can map to: `2^(H+1) - 1`.
pub const MAX_HASH: u64 = (1 << (NUM_HASH_BITS + 1)) - 1;

/// Maximum number of bucket-index bits; the index array holds
/// `2^MAX_INDEX_BITS` slots. With this set to zero the map degenerates to
/// a single ordered list.
pub const MAX_INDEX_BITS: u32 = 10;

/// Computes the list key for `id`.
///
/// The low `H` bits of `id` are reversed into the low bits of the result,
/// the result is shifted left one, and the discriminator bit is set unless
/// `sentinel` is true. For sentinels the "id" argument is the bucket index.
#[inline]
pub(crate) const fn id_to_hash(id: u64, sentinel: bool) -> u64 {
    let reversed = id.reverse_bits() >> (64 - NUM_HASH_BITS);
    (reversed << 1) | if sentinel { 0 } else { 1 }
}

/// Computes the bucket index a hash falls into for a given index width.
///
/// Drops the discriminator bit, then reverses the top `index_bits` bits of
/// the remaining `H`-bit value into the low bits of the index. Zero width
/// always yields bucket 0.
#[inline]
pub(crate) const fn hash_to_bucket_idx(hash: u64, index_bits: u32) -> usize {
    if index_bits == 0 {
        return 0;
    }
    let prefix = ((hash >> 1) << (64 - NUM_HASH_BITS)).reverse_bits();
    (prefix & ((1 << index_bits) - 1)) as usize
}

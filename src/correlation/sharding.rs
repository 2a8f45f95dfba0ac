const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

pub fn fnv1a_32(input: &str) -> u32 {
    input.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Literal channel a request is published on. With more than one channel configured the
/// request id picks the shard, so every message of one request lands on the same subscriber.
pub fn request_channel(channel: &str, num_channels: u32, request_id: &str) -> String {
    if num_channels > 1 {
        format!("{channel}.{}", fnv1a_32(request_id) % num_channels)
    } else {
        channel.to_string()
    }
}

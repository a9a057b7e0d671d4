/// Decode a string of hex digits. Whitespace between digits is ignored.
#[allow(dead_code)]
pub fn from_hex(text: &str) -> Vec<u8> {
    let digits = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_digit(16).expect("invalid hex digit") as u8)
        .collect::<Vec<_>>();
    assert!(digits.len() % 2 == 0, "odd number of hex digits");
    digits.chunks(2).map(|pair| pair[0] << 4 | pair[1]).collect()
}

/// Format bytes as space separated groups of four hex digits.
#[allow(dead_code)]
pub fn to_hex(data: &[u8]) -> String {
    data.chunks(2)
        .map(|chunk| chunk.iter().map(|b| format!("{:02X}", b)).collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

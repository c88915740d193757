//! Transfer protocol: one 4-byte big-endian signed request code per connection.
//! `-1` asks for the fragment count; `i >= 0` asks for fragment `i`, sent raw until close.

pub const CODE_SIZE: usize = 4;
/// Request code for the fragment-count query.
pub const FRAGMENT_COUNT_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRequest {
    FragmentCount,
    Fragment(u32),
    /// Negative code other than -1. Answered with zero bytes.
    Invalid(i32),
}

impl TransferRequest {
    pub fn from_code(code: i32) -> Self {
        match code {
            FRAGMENT_COUNT_CODE => TransferRequest::FragmentCount,
            i if i >= 0 => TransferRequest::Fragment(i as u32),
            other => TransferRequest::Invalid(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            TransferRequest::FragmentCount => FRAGMENT_COUNT_CODE,
            TransferRequest::Fragment(i) => *i as i32,
            TransferRequest::Invalid(c) => *c,
        }
    }

    pub fn decode(bytes: [u8; CODE_SIZE]) -> Self {
        Self::from_code(i32::from_be_bytes(bytes))
    }

    pub fn encode(&self) -> [u8; CODE_SIZE] {
        self.code().to_be_bytes()
    }
}

/// What the server writes back for a request against a set of `fragment_count` fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferReply {
    /// 4-byte big-endian count.
    Count(i32),
    /// Raw bytes of this fragment index.
    Fragment(usize),
    /// Nothing; close the connection.
    Empty,
}

pub fn reply_for(request: TransferRequest, fragment_count: usize) -> TransferReply {
    match request {
        TransferRequest::FragmentCount => {
            TransferReply::Count(i32::try_from(fragment_count).unwrap_or(i32::MAX))
        }
        TransferRequest::Fragment(i) if (i as usize) < fragment_count => {
            TransferReply::Fragment(i as usize)
        }
        TransferRequest::Fragment(_) | TransferRequest::Invalid(_) => TransferReply::Empty,
    }
}

pub fn encode_count(count: i32) -> [u8; CODE_SIZE] {
    count.to_be_bytes()
}

pub fn decode_count(bytes: [u8; CODE_SIZE]) -> i32 {
    i32::from_be_bytes(bytes)
}

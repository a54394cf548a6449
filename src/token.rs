/// A caller-chosen tag returned alongside readiness events.
///
/// `usize::MAX` is reserved for the dispatcher's internal wake resource.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

pub(crate) const WAKE_TOKEN: Token = Token(usize::MAX);

impl From<usize> for Token {
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    fn from(val: Token) -> usize {
        val.0
    }
}

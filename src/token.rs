/// An opaque index identifying a registration in the [`Reactor`](crate::Reactor)'s
/// registry.
///
/// A `Token` is the Rust-safe replacement for the raw back-pointer the
/// original C implementation stashes in `epoll_event.data.ptr` / the
/// kqueue `udata` field: Rust cannot safely alias a registered `Handle`
/// through a raw pointer reachable from two places (the registry's slot
/// and the in-flight callback), so the registry is addressed by this
/// small index instead and resolves it back to the owning `Handle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

impl From<usize> for Token {
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    fn from(token: Token) -> usize {
        token.0
    }
}

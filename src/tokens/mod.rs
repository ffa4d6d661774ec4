//! Token and signature allocation for inserted probe calls.
//!
//! A rewrite needs metadata the original module does not have: member references to the probe
//! entry points, user strings for the probe arguments, type specifications for boxing and the
//! extended local variable signature. Each need is expressed as a [`TokenRequest`]; the
//! [`TokenAllocator`] turns requests into tokens through [`Module::allocate_token`].
//!
//! The allocator scans the module's existing token ranges once, when it is created, and keeps
//! the next free row of every table in a cache. Identical requests within one pass share one
//! token. Every token the module hands back is validated against the scanned ranges and the
//! tokens already minted, so allocations are disjoint from the original metadata and from each
//! other.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::module::{InMemoryModule, ModuleId};
//! use cilweave::tokens::{TokenAllocator, TokenRequest};
//!
//! let module = InMemoryModule::new(ModuleId(1), "Shop");
//! let mut allocator = TokenAllocator::scan(&module)?;
//!
//! let first = allocator.allocate(&module, &TokenRequest::TypeSpec(vec![0x1C]))?;
//! let again = allocator.allocate(&module, &TokenRequest::TypeSpec(vec![0x1C]))?;
//! assert_eq!(first, again);
//! # Ok::<(), cilweave::Error>(())
//! ```

use std::collections::{HashMap, HashSet};

use strum::IntoEnumIterator;

use crate::{
    metadata::token::{TableId, Token, MAX_ROW},
    module::Module,
    Error, Result,
};

/// The kind of metadata a request produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `MemberRef` to a probe entry point
    MemberRef,
    /// `StandAloneSig` holding a local variable signature
    StandAloneSig,
    /// `TypeSpec` holding a single type
    TypeSpec,
    /// `#US` heap string
    UserString,
}

impl TokenKind {
    /// The table tokens of this kind belong to
    #[must_use]
    pub fn table(self) -> TableId {
        match self {
            TokenKind::MemberRef => TableId::MemberRef,
            TokenKind::StandAloneSig => TableId::StandAloneSig,
            TokenKind::TypeSpec => TableId::TypeSpec,
            TokenKind::UserString => TableId::UserString,
        }
    }
}

/// One piece of metadata a rewrite needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenRequest {
    /// Reference to a static method on an external type
    MemberRef {
        /// Assembly defining the type
        assembly: String,
        /// Full name of the type
        type_name: String,
        /// Method name
        name: String,
        /// `MethodRefSig` blob
        signature: Vec<u8>,
    },
    /// Local variable signature blob
    StandAloneSig(Vec<u8>),
    /// Type specification blob
    TypeSpec(Vec<u8>),
    /// User string
    UserString(String),
}

impl TokenRequest {
    /// The kind of token this request produces
    #[must_use]
    pub fn kind(&self) -> TokenKind {
        match self {
            TokenRequest::MemberRef { .. } => TokenKind::MemberRef,
            TokenRequest::StandAloneSig(_) => TokenKind::StandAloneSig,
            TokenRequest::TypeSpec(_) => TokenKind::TypeSpec,
            TokenRequest::UserString(_) => TokenKind::UserString,
        }
    }
}

/// The tokens resolved for one method's requests.
#[derive(Debug, Clone, Default)]
pub struct TokenAllocation {
    tokens: HashMap<TokenRequest, Token>,
    minted: Vec<Token>,
}

impl TokenAllocation {
    /// Token resolved for `request`
    #[must_use]
    pub fn get(&self, request: &TokenRequest) -> Option<Token> {
        self.tokens.get(request).copied()
    }

    /// Token resolved for `request`, or an error naming it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedConstruct`] if the request was not part of the allocation.
    pub fn require(&self, request: &TokenRequest) -> Result<Token> {
        self.get(request)
            .ok_or_else(|| unsupported_error!("No token allocated for {:?}", request))
    }

    /// Tokens newly created by the module for this allocation, in allocation order
    #[must_use]
    pub fn minted(&self) -> &[Token] {
        &self.minted
    }

    /// Number of distinct requests resolved
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if nothing was requested
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// All resolved tokens
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.tokens.values().copied()
    }
}

/// Per-pass token allocator with a cached next free row per table.
#[derive(Debug)]
pub struct TokenAllocator {
    existing: HashMap<TableId, u32>,
    next_row: HashMap<TableId, u32>,
    cache: HashMap<TokenRequest, Token>,
    minted: HashSet<Token>,
}

impl TokenAllocator {
    /// Scan the module's token ranges.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Module::token_ranges`].
    pub fn scan(module: &dyn Module) -> Result<Self> {
        let mut existing: HashMap<TableId, u32> = TableId::iter().map(|table| (table, 0)).collect();
        for range in module.token_ranges()? {
            let rows = existing.entry(range.table).or_insert(0);
            *rows = (*rows).max(range.rows);
        }

        let next_row = existing
            .iter()
            .map(|(table, rows)| (*table, rows.saturating_add(1)))
            .collect();

        log::debug!(
            "Scanned token ranges of module {}: {} tables",
            module.id(),
            existing.len()
        );

        Ok(TokenAllocator {
            existing,
            next_row,
            cache: HashMap::new(),
            minted: HashSet::new(),
        })
    }

    /// Resolve one request, reusing the token of an identical earlier request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenSpaceExhausted`] when the table has no free row left, and
    /// [`Error::MetadataCorrupt`] when the module returns a token that is in the wrong table,
    /// collides with an existing token or was already minted.
    pub fn allocate(&mut self, module: &dyn Module, request: &TokenRequest) -> Result<Token> {
        if let Some(token) = self.cache.get(request) {
            return Ok(*token);
        }

        let table = request.kind().table();
        let next = self.next_row.get(&table).copied().unwrap_or(1);
        if next > MAX_ROW {
            return Err(Error::TokenSpaceExhausted(table.raw()));
        }

        let token = module.allocate_token(request)?;
        self.validate(table, token)?;

        self.minted.insert(token);
        self.next_row
            .insert(table, next.max(token.row().saturating_add(1)));
        self.cache.insert(request.clone(), token);
        Ok(token)
    }

    /// Resolve every request of one method.
    ///
    /// # Errors
    ///
    /// Stops at the first failing request; tokens minted before it stay cached.
    pub fn allocate_all(
        &mut self,
        module: &dyn Module,
        requests: &[TokenRequest],
    ) -> Result<TokenAllocation> {
        let mut allocation = TokenAllocation::default();
        for request in requests {
            let was_cached = self.cache.contains_key(request);
            let token = self.allocate(module, request)?;
            if !was_cached {
                allocation.minted.push(token);
            }
            allocation.tokens.insert(request.clone(), token);
        }

        Ok(allocation)
    }

    /// Returns `true` if `token` falls inside the ranges scanned at creation
    #[must_use]
    pub fn is_existing(&self, token: Token) -> bool {
        token.table_id().is_some_and(|table| {
            !token.is_null() && token.row() <= self.existing.get(&table).copied().unwrap_or(0)
        })
    }

    /// Number of distinct tokens minted so far
    #[must_use]
    pub fn minted_count(&self) -> usize {
        self.minted.len()
    }

    fn validate(&self, table: TableId, token: Token) -> Result<()> {
        if !token.is_table(table) || token.is_null() {
            return Err(malformed_error!(
                "Module returned {} for a {:?} request",
                token,
                table
            ));
        }

        if self.is_existing(token) {
            return Err(malformed_error!(
                "Module returned {}, which collides with existing metadata",
                token
            ));
        }

        if self.minted.contains(&token) {
            return Err(malformed_error!("Module returned {} twice", token));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{InMemoryModule, ModuleId};

    fn member_ref(name: &str) -> TokenRequest {
        TokenRequest::MemberRef {
            assembly: "Probes".into(),
            type_name: "Probes.Hooks".into(),
            name: name.into(),
            signature: vec![0x00, 0x00, 0x01],
        }
    }

    #[test]
    fn test_tokens_are_disjoint_from_existing() -> Result<()> {
        let module = InMemoryModule::new(ModuleId(1), "Shop")
            .with_row_count(TableId::MemberRef, 40)
            .with_row_count(TableId::TypeSpec, 3);
        let mut allocator = TokenAllocator::scan(&module)?;

        let enter = allocator.allocate(&module, &member_ref("Enter"))?;
        let exit = allocator.allocate(&module, &member_ref("Exit"))?;
        let spec = allocator.allocate(&module, &TokenRequest::TypeSpec(vec![0x1C]))?;

        assert_eq!(enter, Token::new(0x0A00_0029));
        assert_eq!(exit, Token::new(0x0A00_002A));
        assert_eq!(spec, Token::new(0x1B00_0004));
        assert!(!allocator.is_existing(enter));
        assert!(allocator.is_existing(Token::new(0x0A00_0028)));
        Ok(())
    }

    #[test]
    fn test_identical_requests_share_a_token() -> Result<()> {
        let module = InMemoryModule::new(ModuleId(1), "Shop");
        let mut allocator = TokenAllocator::scan(&module)?;

        let requests = vec![
            member_ref("Enter"),
            TokenRequest::UserString("probe".into()),
            member_ref("Enter"),
        ];
        let first = allocator.allocate_all(&module, &requests)?;
        assert_eq!(first.len(), 2);
        assert_eq!(first.minted().len(), 2);

        let second = allocator.allocate_all(&module, &requests[..1])?;
        assert_eq!(second.get(&requests[0]), first.get(&requests[0]));
        assert!(second.minted().is_empty());
        assert_eq!(allocator.minted_count(), 2);
        Ok(())
    }

    #[test]
    fn test_exhausted_table() -> Result<()> {
        let module = InMemoryModule::new(ModuleId(1), "Shop")
            .with_row_count(TableId::StandAloneSig, MAX_ROW);
        let mut allocator = TokenAllocator::scan(&module)?;

        let result = allocator.allocate(&module, &TokenRequest::StandAloneSig(vec![0x07, 0x00]));
        assert!(matches!(result, Err(Error::TokenSpaceExhausted(0x11))));

        // Other tables are unaffected
        allocator.allocate(&module, &TokenRequest::TypeSpec(vec![0x1C]))?;
        Ok(())
    }

    #[test]
    fn test_require_unknown_request() {
        let allocation = TokenAllocation::default();
        assert!(matches!(
            allocation.require(&TokenRequest::TypeSpec(vec![0x08])),
            Err(Error::UnsupportedConstruct(_))
        ));
    }
}

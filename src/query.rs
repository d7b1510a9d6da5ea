//! Field and alias tables from GraphQL query documents.
//!
//! Live updates only know field *names*, but GraphQL responses are keyed by whatever the query asked for.
//! [`QueryParams`] records, per GraphQL type, which fields a query selected and under which aliases,
//! so that merged entities look like the response the page originally received.
//!
//! Type names are inferred the way the delivery API names them:
//! `post(id: …) { … }` selects a `Post`, `postCollection { items { … } }` selects `Post`s, `... on Author { … }` selects an `Author`.

use crate::error::QueryError;
use hashbrown::{HashMap, HashSet};
use logos::Logos;
use tracing::instrument;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n,\u{FEFF}]+")]
#[logos(skip r"#[^\n]*")]
enum Token<'src> {
	#[token("{")]
	LBrace,
	#[token("}")]
	RBrace,
	#[token("(")]
	LParen,
	#[token(")")]
	RParen,
	#[token("[")]
	LBracket,
	#[token("]")]
	RBracket,
	#[token(":")]
	Colon,
	#[token("...")]
	Spread,
	#[token("@")]
	At,
	#[token("$")]
	Dollar,
	#[token("!")]
	Bang,
	#[token("=")]
	Equals,
	#[token("|")]
	Pipe,
	#[token("&")]
	Amp,

	#[regex(r"[_A-Za-z][_0-9A-Za-z]*", |lex| lex.slice())]
	Name(&'src str),

	#[regex(r#""([^"\\]|\\.)*""#, |lex| lex.slice())]
	String(&'src str),

	#[regex(r"-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice())]
	Number(&'src str),
}

/// What one query selects on one GraphQL type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeSelection {
	pub fields: HashSet<String>,
	/// Original field name → every alias it was selected under.
	pub aliases: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
	types: HashMap<String, TypeSelection>,
}

impl QueryParams {
	/// # Errors
	///
	/// Iff `query` isn't lexically or structurally a GraphQL executable document.
	#[instrument(skip(query))]
	pub fn parse(query: &str) -> Result<Self, QueryError> {
		let mut tokens = Vec::new();
		let mut lexer = Token::lexer(query);
		while let Some(token) = lexer.next() {
			match token {
				Ok(token) => tokens.push((lexer.span().start, token)),
				Err(()) => return Err(QueryError::Lexer { pos: lexer.span().start }),
			}
		}

		let mut parser = Parser { tokens, i: 0, params: Self::default() };
		parser.document()?;
		Ok(parser.params)
	}

	#[must_use]
	pub fn get(&self, type_name: &str) -> Option<&TypeSelection> {
		self.types.get(type_name)
	}

	/// Whether a field should be written on an entity of `type_name`.
	///
	/// Types the query never mentions accept everything, since the page may have obtained them from a fragment this document doesn't contain.
	#[must_use]
	pub fn is_selected(&self, type_name: &str, field: &str) -> bool {
		self.types.get(type_name).map_or(true, |selection| selection.fields.contains(field))
	}

	#[must_use]
	pub fn aliases(&self, type_name: &str, field: &str) -> &[String] {
		self.types
			.get(type_name)
			.and_then(|selection| selection.aliases.get(field))
			.map_or(&[], Vec::as_slice)
	}

	fn record(&mut self, type_name: &str, field: &str, alias: Option<&str>) {
		let selection = self.types.entry_ref(type_name).or_default();
		selection.fields.insert(field.to_owned());
		if let Some(alias) = alias {
			let aliases = selection.aliases.entry_ref(field).or_default();
			if !aliases.iter().any(|known| known == alias) {
				aliases.push(alias.to_owned());
			}
		}
	}
}

/// `"blogPost"` → `"BlogPost"`, `"blogPostCollection"` → `"BlogPost"`.
#[must_use]
pub fn type_name_for_field(field: &str) -> String {
	capitalize(field.strip_suffix("Collection").filter(|stem| !stem.is_empty()).unwrap_or(field))
}

/// Upper-cases the first character.
#[must_use]
pub fn capitalize(s: &str) -> String {
	let mut chars = s.chars();
	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars).collect(),
		None => String::new(),
	}
}

/// Where a selection set sits.
#[derive(Debug, Clone)]
enum Scope {
	/// Operation roots. Their fields belong to `Query`/`Mutation`, which never hold entities.
	Root,
	Type(String),
	/// The `{ items total … }` wrapper of a `…Collection` field, whose `items` are of the given type.
	Collection(String),
}

impl Scope {
	fn of_field(field: &str) -> Self {
		if field.len() > "Collection".len() && field.ends_with("Collection") {
			Scope::Collection(type_name_for_field(field))
		} else {
			Scope::Type(type_name_for_field(field))
		}
	}
}

struct Parser<'src> {
	tokens: Vec<(usize, Token<'src>)>,
	i: usize,
	params: QueryParams,
}

impl<'src> Parser<'src> {
	fn peek(&self) -> Option<Token<'src>> {
		self.tokens.get(self.i).map(|&(_, token)| token)
	}

	fn peek_at(&self, offset: usize) -> Option<Token<'src>> {
		self.tokens.get(self.i + offset).map(|&(_, token)| token)
	}

	fn next(&mut self) -> Result<Token<'src>, QueryError> {
		let token = self.peek().ok_or(QueryError::UnexpectedEof)?;
		self.i += 1;
		Ok(token)
	}

	fn unexpected(&self, expected: &'static str) -> QueryError {
		match self.tokens.get(self.i) {
			Some(&(pos, token)) => QueryError::UnexpectedToken { pos, expected, found: format!("{:?}", token) },
			None => QueryError::UnexpectedEof,
		}
	}

	fn expect(&mut self, expected: Token<'src>, description: &'static str) -> Result<(), QueryError> {
		if self.peek() == Some(expected) {
			self.i += 1;
			Ok(())
		} else {
			Err(self.unexpected(description))
		}
	}

	fn name(&mut self) -> Result<&'src str, QueryError> {
		match self.peek() {
			Some(Token::Name(name)) => {
				self.i += 1;
				Ok(name)
			}
			_ => Err(self.unexpected("name")),
		}
	}

	fn document(&mut self) -> Result<(), QueryError> {
		while let Some(token) = self.peek() {
			match token {
				Token::LBrace => self.selection_set(&Scope::Root)?,
				Token::Name("query" | "mutation" | "subscription") => {
					self.i += 1;
					if let Some(Token::Name(_)) = self.peek() {
						self.i += 1;
					}
					if self.peek() == Some(Token::LParen) {
						self.skip_balanced(Token::LParen, Token::RParen)?;
					}
					self.directives()?;
					self.selection_set(&Scope::Root)?;
				}
				Token::Name("fragment") => {
					self.i += 1;
					self.name()?;
					self.expect(Token::Name("on"), "`on`")?;
					let type_condition = self.name()?;
					self.directives()?;
					self.selection_set(&Scope::Type(type_condition.to_owned()))?;
				}
				_ => return Err(self.unexpected("operation or fragment definition")),
			}
		}
		Ok(())
	}

	fn selection_set(&mut self, scope: &Scope) -> Result<(), QueryError> {
		self.expect(Token::LBrace, "`{`")?;
		loop {
			match self.peek() {
				Some(Token::RBrace) => {
					self.i += 1;
					return Ok(());
				}
				Some(Token::Spread) => {
					self.i += 1;
					match (self.peek(), self.peek_at(1)) {
						(Some(Token::Name("on")), Some(Token::Name(type_condition))) => {
							self.i += 2;
							self.directives()?;
							self.selection_set(&Scope::Type(type_condition.to_owned()))?;
						}
						(Some(Token::Name(_)), _) => {
							// Named fragment spread; the definition is recorded on its own.
							self.i += 1;
							self.directives()?;
						}
						_ => {
							self.directives()?;
							self.selection_set(scope)?;
						}
					}
				}
				Some(Token::Name(_)) => self.field(scope)?,
				_ => return Err(self.unexpected("selection")),
			}
		}
	}

	fn field(&mut self, scope: &Scope) -> Result<(), QueryError> {
		let first = self.name()?;
		let (alias, name) = if self.peek() == Some(Token::Colon) {
			self.i += 1;
			(Some(first), self.name()?)
		} else {
			(None, first)
		};

		if self.peek() == Some(Token::LParen) {
			self.skip_balanced(Token::LParen, Token::RParen)?;
		}
		self.directives()?;

		if let Scope::Type(type_name) = scope {
			self.params.record(type_name, name, alias);
		}

		if self.peek() == Some(Token::LBrace) {
			let child_scope = match scope {
				Scope::Collection(item_type) if name == "items" => Scope::Type(item_type.clone()),
				_ => Scope::of_field(name),
			};
			self.selection_set(&child_scope)?;
		}
		Ok(())
	}

	fn directives(&mut self) -> Result<(), QueryError> {
		while self.peek() == Some(Token::At) {
			self.i += 1;
			self.name()?;
			if self.peek() == Some(Token::LParen) {
				self.skip_balanced(Token::LParen, Token::RParen)?;
			}
		}
		Ok(())
	}

	fn skip_balanced(&mut self, open: Token<'src>, close: Token<'src>) -> Result<(), QueryError> {
		self.expect(open, "opening bracket")?;
		let mut depth = 1_usize;
		while depth > 0 {
			let token = self.next()?;
			if token == open {
				depth += 1;
			} else if token == close {
				depth -= 1;
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const QUERY: &str = r#"
		# Page query
		query PostPage($slug: String!, $preview: Boolean = false) {
			postCollection(where: { slug: $slug }, limit: 1, preview: $preview) {
				total
				items {
					__typename
					sys { id }
					name: internalName
					title @include(if: true)
					heading: title
					author {
						...AuthorFields
					}
					relatedPostsCollection(limit: 3) {
						items {
							sys { id }
							slug
						}
					}
				}
			}
		}

		fragment AuthorFields on Person {
			sys { id }
			displayName: name
		}
	"#;

	#[test]
	fn records_fields_and_aliases_per_type() {
		let params = QueryParams::parse(QUERY).unwrap();

		let post = params.get("Post").unwrap();
		for field in ["__typename", "sys", "internalName", "title", "author", "relatedPostsCollection"] {
			assert!(post.fields.contains(field), "missing {}", field);
		}
		assert!(!post.fields.contains("items"));
		assert_eq!(params.aliases("Post", "internalName"), ["name"]);
		assert_eq!(params.aliases("Post", "title"), ["heading"]);
		assert!(params.aliases("Post", "author").is_empty());

		assert!(params.get("RelatedPosts").unwrap().fields.contains("slug"));
		assert_eq!(params.aliases("Person", "name"), ["displayName"]);
	}

	#[test]
	fn unknown_types_accept_every_field() {
		let params = QueryParams::parse(QUERY).unwrap();
		assert!(params.is_selected("Post", "title"));
		assert!(!params.is_selected("Post", "body"));
		assert!(params.is_selected("Landing", "body"));
	}

	#[test]
	fn inline_fragments_name_their_type() {
		let params = QueryParams::parse("{ page(id: \"1\") { blocks { ... on Hero { headline: title } } } }").unwrap();
		assert_eq!(params.aliases("Hero", "title"), ["headline"]);
	}

	#[test]
	fn reports_truncated_queries() {
		assert_eq!(QueryParams::parse("query { post { title "), Err(QueryError::UnexpectedEof));
		assert!(matches!(QueryParams::parse("query { post % }"), Err(QueryError::Lexer { .. })));
	}

	#[test]
	fn type_names() {
		assert_eq!(type_name_for_field("blogPost"), "BlogPost");
		assert_eq!(type_name_for_field("blogPostCollection"), "BlogPost");
		assert_eq!(type_name_for_field("Collection"), "Collection");
	}
}

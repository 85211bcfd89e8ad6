#[cfg(test)]
mod lexer_tests {
    use pretty_assertions::assert_eq;

    use crate::error::{CompileError, ErrorKind};
    use crate::lexer::token::TokenKind;
    use crate::lexer::Lexer;

    /// Lex the whole input, asserting no diagnostics and no fatal
    /// errors. The trailing `Eof` is included.
    fn lex_ok(input: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(input.as_bytes());
        let mut kinds = Vec::new();
        loop {
            let tok = lexer.peek().expect("unexpected fatal lex error");
            kinds.push(tok.kind);
            if tok.kind == TokenKind::Eof {
                break;
            }
            lexer.accept_it();
        }
        assert!(
            lexer.diagnostics().is_empty(),
            "Unexpected diagnostics: {:?}",
            lexer.diagnostics()
        );
        kinds
    }

    /// Lex until the first fatal error and return it.
    fn lex_fatal(input: &str) -> CompileError {
        let mut lexer = Lexer::new(input.as_bytes());
        loop {
            match lexer.peek() {
                Ok(tok) if tok.kind == TokenKind::Eof => {
                    panic!("expected a fatal error, lexed to EOF")
                }
                Ok(_) => lexer.accept_it(),
                Err(err) => return err,
            }
        }
    }

    #[test]
    fn empty_input() {
        assert_eq!(lex_ok(""), vec![TokenKind::Eof]);
    }

    #[test]
    fn blank_lines() {
        assert_eq!(
            lex_ok("\n\n"),
            vec![TokenKind::LineEnd, TokenKind::LineEnd, TokenKind::Eof]
        );
    }

    #[test]
    fn whitespace_skipped() {
        assert_eq!(
            lex_ok("  \t var"),
            vec![TokenKind::Var, TokenKind::Eof]
        );
    }

    #[test]
    fn all_keywords() {
        let kinds = lex_ok("const var func void non-void if else while and or return");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Const,
                TokenKind::Var,
                TokenKind::Func,
                TokenKind::Void,
                TokenKind::NonVoid,
                TokenKind::If,
                TokenKind::Else,
                TokenKind::While,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Return,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn keywords_case_insensitive() {
        assert_eq!(
            lex_ok("IF If iF if"),
            vec![
                TokenKind::If,
                TokenKind::If,
                TokenKind::If,
                TokenKind::If,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn keyword_prefix_wins() {
        // The lexer commits to a keyword as soon as its spelling
        // matches; the leftover characters start the next token.
        assert_eq!(
            lex_ok("varx"),
            vec![TokenKind::Var, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn near_keyword_is_identifier() {
        assert_eq!(lex_ok("voi"), vec![TokenKind::Identifier, TokenKind::Eof]);
        assert_eq!(lex_ok("whil"), vec![TokenKind::Identifier, TokenKind::Eof]);
    }

    #[test]
    fn nonvoid_needs_hyphen() {
        assert_eq!(
            lex_ok("nonvoid"),
            vec![TokenKind::Identifier, TokenKind::Eof]
        );
        assert_eq!(lex_ok("non-void"), vec![TokenKind::NonVoid, TokenKind::Eof]);
    }

    #[test]
    fn identifiers() {
        assert_eq!(lex_ok("foo"), vec![TokenKind::Identifier, TokenKind::Eof]);
        assert_eq!(lex_ok("a1b2"), vec![TokenKind::Identifier, TokenKind::Eof]);
    }

    #[test]
    fn identifier_span_text() {
        let mut lexer = Lexer::new("  count ".as_bytes());
        let tok = lexer.peek().unwrap();
        assert_eq!(tok.kind, TokenKind::Identifier);
        assert_eq!(lexer.text(tok.span), "count");
    }

    #[test]
    fn numbers() {
        assert_eq!(
            lex_ok("42 010 0x1F"),
            vec![
                TokenKind::Number,
                TokenKind::Number,
                TokenKind::Number,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn number_span_text() {
        let mut lexer = Lexer::new("0x1F ".as_bytes());
        let tok = lexer.peek().unwrap();
        assert_eq!(lexer.text(tok.span), "0x1F");
    }

    #[test]
    fn number_with_fraction_is_one_token() {
        let mut lexer = Lexer::new("5.25 ".as_bytes());
        let tok = lexer.peek().unwrap();
        assert_eq!(tok.kind, TokenKind::Number);
        assert_eq!(lexer.text(tok.span), "5.25");
    }

    #[test]
    fn number_trailing_dot() {
        let mut lexer = Lexer::new("7.".as_bytes());
        let tok = lexer.peek().unwrap();
        assert_eq!(tok.kind, TokenKind::Number);
        assert_eq!(lexer.text(tok.span), "7.");
    }

    #[test]
    fn number_leading_dot() {
        assert_eq!(lex_ok(".5"), vec![TokenKind::Number, TokenKind::Eof]);
    }

    #[test]
    fn single_char_operators() {
        assert_eq!(
            lex_ok("+ - * / % & ^ | ~ ( ) { } ,"),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Times,
                TokenKind::Divide,
                TokenKind::Modulo,
                TokenKind::BitwiseAnd,
                TokenKind::BitwiseXor,
                TokenKind::BitwiseOr,
                TokenKind::BitwiseNot,
                TokenKind::LPar,
                TokenKind::RPar,
                TokenKind::LCPar,
                TokenKind::RCPar,
                TokenKind::Comma,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn multi_char_operators() {
        assert_eq!(
            lex_ok("< << <= > >> >= = == ! !="),
            vec![
                TokenKind::LessThan,
                TokenKind::LeftShift,
                TokenKind::LessThanEquals,
                TokenKind::GreaterThan,
                TokenKind::RightShift,
                TokenKind::GreaterThanEquals,
                TokenKind::Assign,
                TokenKind::Equals,
                TokenKind::Not,
                TokenKind::NotEquals,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn shift_without_space_binds_greedily() {
        assert_eq!(
            lex_ok("a<<b"),
            vec![
                TokenKind::Identifier,
                TokenKind::LeftShift,
                TokenKind::Identifier,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn assignment_line() {
        assert_eq!(
            lex_ok("x = y == z\n"),
            vec![
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::Identifier,
                TokenKind::Equals,
                TokenKind::Identifier,
                TokenKind::LineEnd,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn peek_is_idempotent() {
        let mut lexer = Lexer::new("var x\n".as_bytes());
        let first = lexer.peek().unwrap();
        let second = lexer.peek().unwrap();
        assert_eq!(first, second);
        lexer.accept_it();
        let third = lexer.peek().unwrap();
        assert_eq!(third.kind, TokenKind::Identifier);
    }

    #[test]
    fn eof_repeats() {
        let mut lexer = Lexer::new("".as_bytes());
        assert_eq!(lexer.peek().unwrap().kind, TokenKind::Eof);
        lexer.accept_it();
        assert_eq!(lexer.peek().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn accept_match_is_silent() {
        let mut lexer = Lexer::new("(".as_bytes());
        lexer.accept(TokenKind::LPar).unwrap();
        assert!(lexer.diagnostics().is_empty());
    }

    #[test]
    fn accept_mismatch_reports_and_consumes() {
        let mut lexer = Lexer::new("( x".as_bytes());
        lexer.accept(TokenKind::RPar).unwrap();
        assert_eq!(lexer.diagnostics().len(), 1);
        assert_eq!(lexer.diagnostics()[0].kind, ErrorKind::ExpectedToken);
        assert_eq!(lexer.diagnostics()[0].message, "Expected `)` but got `(`");
        // The wrong token was consumed; lexing continues.
        assert_eq!(lexer.peek().unwrap().kind, TokenKind::Identifier);
    }

    #[test]
    fn accept_mismatch_at_eof_names_eof() {
        let mut lexer = Lexer::new("".as_bytes());
        lexer.accept(TokenKind::LineEnd).unwrap();
        assert_eq!(lexer.diagnostics()[0].message, "Expected `\\n` but got `EOF`");
    }

    #[test]
    fn unrecognized_token_is_fatal() {
        let err = lex_fatal("@");
        assert_eq!(err.kind, ErrorKind::UnrecognizedToken);
        assert_eq!(err.message, "Unrecognized token: @");
    }

    #[test]
    fn unrecognized_after_valid_tokens() {
        let err = lex_fatal("var x @\n");
        assert_eq!(err.kind, ErrorKind::UnrecognizedToken);
    }

    #[test]
    fn spans_index_the_input_buffer() {
        let mut lexer = Lexer::new("var x".as_bytes());
        let var = lexer.peek().unwrap();
        assert_eq!((var.span.start, var.span.end), (0, 3));
        lexer.accept_it();
        let x = lexer.peek().unwrap();
        assert_eq!((x.span.start, x.span.end), (4, 5));
    }

    /// Reader that counts how many bytes were actually pulled.
    struct CountingReader<'a> {
        inner: &'a [u8],
        read: usize,
    }

    impl std::io::Read for CountingReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = std::io::Read::read(&mut self.inner, buf)?;
            self.read += n;
            Ok(n)
        }
    }

    #[test]
    fn lexing_reads_each_input_byte_once() {
        // Lookahead is served from the input buffer, never by
        // re-reading the source, so a well-formed program of n bytes
        // costs at most n reads.
        let source = "var x = 5\nfunc void main() { x = x + 1\n }\n";
        let mut counter = CountingReader {
            inner: source.as_bytes(),
            read: 0,
        };
        let mut lexer = Lexer::new(&mut counter);
        while lexer.peek().expect("lex error").kind != TokenKind::Eof {
            lexer.accept_it();
        }
        drop(lexer);
        assert!(counter.read <= source.len());
    }

    #[test]
    fn buffer_bytes_stay_stable() {
        // Spans taken early must still resolve to the same text
        // after the whole input has been consumed.
        let mut lexer = Lexer::new("first second third".as_bytes());
        let first = lexer.peek().unwrap();
        lexer.accept_it();
        while lexer.peek().unwrap().kind != TokenKind::Eof {
            lexer.accept_it();
        }
        assert_eq!(lexer.text(first.span), "first");
    }

    #[test]
    fn full_declaration_line() {
        assert_eq!(
            lex_ok("func non-void add(a, b) { return a + b }\n"),
            vec![
                TokenKind::Func,
                TokenKind::NonVoid,
                TokenKind::Identifier,
                TokenKind::LPar,
                TokenKind::Identifier,
                TokenKind::Comma,
                TokenKind::Identifier,
                TokenKind::RPar,
                TokenKind::LCPar,
                TokenKind::Return,
                TokenKind::Identifier,
                TokenKind::Plus,
                TokenKind::Identifier,
                TokenKind::RCPar,
                TokenKind::LineEnd,
                TokenKind::Eof
            ]
        );
    }
}

// Parser for kernel IR text.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators. Mnemonics, types and keywords all arrive as `Token::Word`
// and are matched by content.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::ir::{BinOp, CastOp, IntPred, Type};
use crate::lexer::Token;

type Extra<'tokens> = extra::Err<Rich<'tokens, Token, SimpleSpan>>;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub module: Option<Module>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse IR text. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(lex_result.tokens).map(eoi, |(t, s): (_, _)| (t, s));

    let (module, parse_errors) = module_parser().parse(stream).into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| Rich::custom(e.span, e.message))
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        module,
        errors: all_errors,
    }
}

/// Textual type name to `Type`.
pub fn parse_type(word: &str) -> Option<Type> {
    match word {
        "void" => Some(Type::Void),
        "ptr" => Some(Type::Ptr),
        _ => {
            let bits: u8 = word.strip_prefix('i')?.parse().ok()?;
            matches!(bits, 1 | 8 | 16 | 32 | 64).then_some(Type::Int(bits))
        }
    }
}

fn parse_cast(word: &str) -> Option<CastOp> {
    match word {
        "zext" => Some(CastOp::ZExt),
        "sext" => Some(CastOp::SExt),
        "trunc" => Some(CastOp::Trunc),
        _ => None,
    }
}

// ── Leaf rules ──

fn kw<'tokens, I>(word: &'static str) -> impl Parser<'tokens, I, (), Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    select! { Token::Word(w) if w == word => () }
}

fn comma<'tokens, I>() -> impl Parser<'tokens, I, (), Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    just(Token::Comma).ignored()
}

fn ty<'tokens, I>() -> impl Parser<'tokens, I, Type, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    select! { Token::Word(w) => w }.try_map(|w, span| {
        parse_type(&w).ok_or_else(|| Rich::custom(span, format!("expected type, found '{}'", w)))
    })
}

fn local<'tokens, I>() -> impl Parser<'tokens, I, Ident, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    select! { Token::Local(name) = e => Ident { name, span: e.span() } }
}

fn global<'tokens, I>() -> impl Parser<'tokens, I, Ident, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    select! { Token::Global(name) = e => Ident { name, span: e.span() } }
}

fn value<'tokens, I>() -> impl Parser<'tokens, I, ValueAst, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    select! {
        Token::Local(name) = e => ValueAst::Local(Ident { name, span: e.span() }),
        Token::Int(v) => ValueAst::Int(v),
        Token::CStr(s) => ValueAst::Str(s),
        Token::Word(w) if w == "null" => ValueAst::Null,
        Token::Word(w) if w == "true" => ValueAst::Int(1),
        Token::Word(w) if w == "false" => ValueAst::Int(0),
    }
}

fn label<'tokens, I>() -> impl Parser<'tokens, I, Ident, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    kw("label").ignore_then(local())
}

/// Trailing `, !kind !N` attachments.
fn attachments<'tokens, I>() -> impl Parser<'tokens, I, Vec<MdRef>, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    comma()
        .ignore_then(select! { Token::MetaName(kind) => kind })
        .then(select! { Token::MetaRef(id) => id })
        .map_with(|(kind, id), e| MdRef {
            kind,
            id,
            span: e.span(),
        })
        .repeated()
        .collect::<Vec<_>>()
}

// ── Instructions ──

fn operation<'tokens, I>() -> impl Parser<'tokens, I, OpAst, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let wrap_flag = select! {
        Token::Word(w) if w == "nsw" || w == "nuw" || w == "exact" => (),
    };

    let binary = select! { Token::Word(w) => w }
        .try_map(|w, span| {
            BinOp::from_mnemonic(&w)
                .ok_or_else(|| Rich::custom(span, format!("unknown instruction '{}'", w)))
        })
        .then_ignore(wrap_flag.repeated())
        .then(ty())
        .then(value())
        .then_ignore(comma())
        .then(value())
        .map(|(((op, ty), lhs), rhs)| OpAst::Binary { op, ty, lhs, rhs });

    let pred = select! { Token::Word(w) => w }.try_map(|w, span| {
        IntPred::from_mnemonic(&w)
            .ok_or_else(|| Rich::custom(span, format!("unknown icmp predicate '{}'", w)))
    });

    let icmp = kw("icmp")
        .ignore_then(pred)
        .then(ty())
        .then(value())
        .then_ignore(comma())
        .then(value())
        .map(|(((pred, ty), lhs), rhs)| OpAst::ICmp { pred, ty, lhs, rhs });

    let select_op = kw("select")
        .ignore_then(ty())
        .ignore_then(value())
        .then_ignore(comma())
        .then(ty())
        .then(value())
        .then_ignore(comma())
        .then_ignore(ty())
        .then(value())
        .map(|(((cond, ty), on_true), on_false)| OpAst::Select {
            cond,
            ty,
            on_true,
            on_false,
        });

    let incoming = value()
        .then_ignore(comma())
        .then(local())
        .delimited_by(just(Token::LBracket), just(Token::RBracket));

    let phi = kw("phi")
        .ignore_then(ty())
        .then(incoming.clone())
        .then(
            comma()
                .ignore_then(incoming)
                .repeated()
                .collect::<Vec<_>>(),
        )
        .map(|((ty, first), rest)| {
            let mut incoming = vec![first];
            incoming.extend(rest);
            OpAst::Phi { ty, incoming }
        });

    let count = select! { Token::Int(n) if n > 0 => n as u64 };
    let alloca = kw("alloca")
        .ignore_then(ty())
        .then(comma().ignore_then(ty()).ignore_then(count).or_not())
        .map(|(ty, count)| OpAst::Alloca {
            ty,
            count: count.unwrap_or(1),
        });

    let load = kw("load")
        .ignore_then(ty())
        .then_ignore(comma())
        .then_ignore(ty())
        .then(value())
        .map(|(ty, ptr)| OpAst::Load { ty, ptr });

    let store = kw("store")
        .ignore_then(ty())
        .then(value())
        .then_ignore(comma())
        .then_ignore(ty())
        .then(value())
        .map(|((ty, value), ptr)| OpAst::Store { ty, value, ptr });

    let gep = kw("getelementptr")
        .ignore_then(kw("inbounds").or_not())
        .ignore_then(ty())
        .then_ignore(comma())
        .then_ignore(ty())
        .then(value())
        .then_ignore(comma())
        .then(ty())
        .then(value())
        .map(|(((elem, base), index_ty), index)| OpAst::Gep {
            elem,
            base,
            index_ty,
            index,
        });

    let cast_op = select! { Token::Word(w) => w }.try_map(|w, span| {
        parse_cast(&w).ok_or_else(|| Rich::custom(span, format!("unknown cast '{}'", w)))
    });

    let cast = cast_op
        .then(ty())
        .then(value())
        .then_ignore(kw("to"))
        .then(ty())
        .map(|(((op, from), value), to)| OpAst::Cast {
            op,
            from,
            value,
            to,
        });

    let call = kw("call")
        .ignore_then(ty())
        .then(global())
        .then(
            ty().then(value())
                .separated_by(comma())
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map(|((ret, callee), args)| OpAst::Call { ret, callee, args });

    choice((
        icmp, select_op, phi, alloca, load, store, gep, cast, call, binary,
    ))
}

fn instruction<'tokens, I>() -> impl Parser<'tokens, I, InstAst, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    local()
        .then_ignore(just(Token::Equals))
        .or_not()
        .then(operation())
        .then(attachments())
        .map_with(|((result, op), md), e| InstAst {
            result,
            op,
            md,
            span: e.span(),
        })
}

fn terminator<'tokens, I>() -> impl Parser<'tokens, I, TermAst, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let cond_br = ty()
        .ignore_then(value())
        .then_ignore(comma())
        .then(label())
        .then_ignore(comma())
        .then(label())
        .map(|((cond, on_true), on_false)| TermKind::CondBr {
            cond,
            on_true,
            on_false,
        });

    let br = kw("br").ignore_then(choice((label().map(TermKind::Br), cond_br)));

    let ret = kw("ret").ignore_then(choice((
        kw("void").to(TermKind::Ret(None)),
        ty().then(value()).map(|tv| TermKind::Ret(Some(tv))),
    )));

    let unreachable = kw("unreachable").to(TermKind::Unreachable);

    choice((br, ret, unreachable))
        .then(attachments())
        .map_with(|(kind, md), e| TermAst {
            kind,
            md,
            span: e.span(),
        })
}

// ── Top level ──

fn module_parser<'tokens, I>() -> impl Parser<'tokens, I, Module, Extra<'tokens>>
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let block_label = select! { Token::Word(name) = e => Ident { name, span: e.span() } }
        .then_ignore(just(Token::Colon));

    let block = block_label
        .then(instruction().repeated().collect::<Vec<_>>())
        .then(terminator())
        .map(|((label, insts), term)| BlockAst { label, insts, term });

    let define = kw("define")
        .ignore_then(ty())
        .then(global())
        .then(
            ty().then(local())
                .separated_by(comma())
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then(
            block
                .repeated()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|(((ret, name), params), blocks), e| {
            Item::Define(FnDef {
                ret,
                name,
                params,
                blocks,
                span: e.span(),
            })
        });

    let declare = kw("declare")
        .ignore_then(ty())
        .then(global())
        .then(
            ty().then_ignore(local().or_not())
                .separated_by(comma())
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map_with(|((ret, name), params), e| {
            Item::Declare(FnDecl {
                ret,
                name,
                params,
                span: e.span(),
            })
        });

    let md_operand = choice((
        select! { Token::MetaRef(id) = e => MdOperandAst::Ref(id, e.span()) },
        select! { Token::MetaStr(s) => MdOperandAst::Str(s) },
        kw("null").to(MdOperandAst::Null),
        ty().then(select! { Token::Int(v) => v })
            .map(|(ty, v)| MdOperandAst::Int(ty, v)),
    ));

    let md_def = select! { Token::MetaRef(id) => id }
        .then_ignore(just(Token::Equals))
        .then(kw("distinct").or_not().map(|d| d.is_some()))
        .then_ignore(just(Token::Bang))
        .then(
            md_operand
                .separated_by(comma())
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|((id, distinct), operands), e| {
            Item::Metadata(MdDef {
                id,
                distinct,
                operands,
                span: e.span(),
            })
        });

    choice((define, declare, md_def))
        .repeated()
        .collect::<Vec<_>>()
        .map_with(|items, e| Module {
            items,
            span: e.span(),
        })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Module {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected errors: {:#?}",
            result.errors
        );
        result.module.expect("expected module")
    }

    fn only_define(m: &Module) -> &FnDef {
        m.items
            .iter()
            .find_map(|i| match i {
                Item::Define(f) => Some(f),
                _ => None,
            })
            .expect("expected a definition")
    }

    #[test]
    fn empty_module() {
        assert!(parse_ok("").items.is_empty());
    }

    #[test]
    fn type_names() {
        assert_eq!(parse_type("i1"), Some(Type::I1));
        assert_eq!(parse_type("i64"), Some(Type::I64));
        assert_eq!(parse_type("ptr"), Some(Type::Ptr));
        assert_eq!(parse_type("i7"), None);
        assert_eq!(parse_type("float"), None);
    }

    #[test]
    fn declaration_with_named_params() {
        let m = parse_ok("declare void @f(i32 %a, ptr)");
        let Item::Declare(d) = &m.items[0] else {
            panic!("expected Declare")
        };
        assert_eq!(d.name.name, "f");
        assert_eq!(d.params, vec![Type::I32, Type::Ptr]);
    }

    #[test]
    fn counted_loop() {
        let m = parse_ok(
            "define i32 @k(i32 %n) {
             entry:
               br label %loop
             loop:
               %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
               %i.next = add nsw i32 %i, 1
               %c = icmp slt i32 %i.next, %n
               br i1 %c, label %loop, label %exit, !llvm.loop !0
             exit:
               ret i32 %i.next
             }
             !0 = distinct !{!0, !1}
             !1 = !{!\"llvm.loop.tripcount\", i32 16, i32 16, i32 16}",
        );
        let f = only_define(&m);
        assert_eq!(f.blocks.len(), 3);
        assert_eq!(f.blocks[1].insts.len(), 3);
        let OpAst::Phi { incoming, .. } = &f.blocks[1].insts[0].op else {
            panic!("expected phi")
        };
        assert_eq!(incoming.len(), 2);
        assert_eq!(f.blocks[1].term.md[0].kind, "llvm.loop");
        assert_eq!(f.blocks[1].term.md[0].id, 0);
        let mds: Vec<&MdDef> = m
            .items
            .iter()
            .filter_map(|i| match i {
                Item::Metadata(d) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(mds.len(), 2);
        assert!(mds[0].distinct);
        assert_eq!(mds[1].operands[1], MdOperandAst::Int(Type::I32, 16));
    }

    #[test]
    fn memory_and_casts() {
        let m = parse_ok(
            "define void @m(ptr %p, i64 %i) {
             entry:
               %buf = alloca i32, i64 4
               %q = getelementptr inbounds i32, ptr %p, i64 %i
               %v = load i32, ptr %q
               %w = zext i32 %v to i64
               %t = trunc i64 %w to i8
               %s = select i1 true, i32 %v, i32 0
               store i32 %v, ptr %buf
               ret void
             }",
        );
        let f = only_define(&m);
        let insts = &f.blocks[0].insts;
        assert!(matches!(insts[0].op, OpAst::Alloca { count: 4, .. }));
        assert!(matches!(insts[1].op, OpAst::Gep { elem: Type::I32, .. }));
        assert!(matches!(
            insts[3].op,
            OpAst::Cast {
                op: CastOp::ZExt,
                to: Type::I64,
                ..
            }
        ));
        assert!(matches!(insts[5].op, OpAst::Select { .. }));
        assert!(insts[6].result.is_none());
    }

    #[test]
    fn call_with_string_and_metadata() {
        let m = parse_ok(
            "define void @k() {
             entry:
               call void @__hlslitesim_trace_bb(ptr c\"k\", i32 0), !hlslitesim.bb_id !0
               unreachable
             }",
        );
        let f = only_define(&m);
        let inst = &f.blocks[0].insts[0];
        let OpAst::Call { callee, args, .. } = &inst.op else {
            panic!("expected call")
        };
        assert_eq!(callee.name, "__hlslitesim_trace_bb");
        assert_eq!(args[0], (Type::Ptr, ValueAst::Str("k".into())));
        assert_eq!(inst.md[0].kind, "hlslitesim.bb_id");
    }

    #[test]
    fn missing_terminator_is_a_parse_error() {
        let result = parse("define void @k() { entry: %x = add i32 1, 2 }");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn unknown_mnemonic_is_rejected() {
        let result = parse("define void @k() { entry: %x = frobnicate i32 1, 2\n ret void }");
        assert!(!result.errors.is_empty());
    }
}

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use std::ops::{Deref, DerefMut};

use anyhow::{bail, Context, Result};
use itertools::Itertools;
use tracing::{debug, warn};

use crate::ir::{IdentId, InstrId, InstructionKind, Operand, Options, SsaBuilder, UnaryOp};

#[derive(Debug)]
pub struct Function {
    ident: Option<IdentId>,
    is_void: bool,
    params: Vec<IdentId>,
    builder: SsaBuilder,
}

impl Function {
    pub fn ident(&self) -> Option<IdentId> {
        self.ident
    }

    pub fn is_void(&self) -> bool {
        self.is_void
    }

    pub fn params(&self) -> &[IdentId] {
        &self.params
    }

    pub fn builder(&self) -> &SsaBuilder {
        &self.builder
    }
}

/// The main body and every function definition, each with its own builder.
///
/// Builder operations reach whichever body is being translated right now
/// through `Deref`: the innermost open function definition, or main.
#[derive(Debug)]
pub struct Program {
    main: SsaBuilder,
    functions: Vec<Function>,
    current: Option<usize>,
    options: Options,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Program {
            main: SsaBuilder::with_options(options),
            functions: vec![],
            current: None,
            options,
        }
    }

    pub fn main(&self) -> &SsaBuilder {
        &self.main
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function(&self, ident: IdentId) -> Option<&Function> {
        self.functions.iter().find(|function| function.ident == Some(ident))
    }

    pub fn in_function_def(&self) -> bool {
        self.current.is_some()
    }

    fn current_function(&self) -> &Function {
        let index = self.current.expect("not inside a function definition");
        &self.functions[index]
    }

    fn current_function_mut(&mut self) -> &mut Function {
        let index = self.current.expect("not inside a function definition");
        &mut self.functions[index]
    }

    pub fn enter_function_def(&mut self, is_void: bool) {
        assert!(self.current.is_none(), "function definitions do not nest");
        self.functions.push(Function {
            ident: None,
            is_void,
            params: vec![],
            builder: SsaBuilder::with_options(self.options),
        });
        self.current = Some(self.functions.len() - 1);
        debug!(is_void, "entered function definition");
    }

    pub fn current_function_is_void(&self) -> bool {
        self.current_function().is_void
    }

    pub fn set_current_function_ident(&mut self, ident: IdentId) {
        self.current_function_mut().ident = Some(ident);
    }

    pub fn add_param_to_current_function(&mut self, ident: IdentId) {
        self.current_function_mut().params.push(ident);
    }

    /// Binds every parameter to the argument register it arrives in, in declaration order.
    pub fn initialize_params_var_decl(&mut self) {
        let function = self.current_function_mut();
        for (slot, &param) in (1..).zip(&function.params) {
            let builder = &mut function.builder;
            builder.add_var_decl(param);
            let arg = builder.insert_register_arg(slot);
            builder.assign(param, arg);
        }
    }

    /// Unknown identifiers are not void, so that the call itself reports them.
    pub fn function_is_void(&self, ident: IdentId) -> bool {
        self.function(ident).map_or(false, Function::is_void)
    }

    fn check_call(&self, callee: IdentId, name: &str, arity: usize) -> Result<()> {
        let function = self
            .function(callee)
            .with_context(|| format!("call to undeclared function `{name}`"))?;
        if function.params.len() != arity {
            bail!(
                "`{name}` takes {} arguments but {arity} were supplied",
                function.params.len()
            );
        }
        Ok(())
    }

    /// Moves the arguments into their registers and calls `callee` from the current block.
    pub fn call_current_function(
        &mut self,
        callee: IdentId,
        name: &str,
        args: &[Operand],
    ) -> Result<InstrId> {
        self.check_call(callee, name, args.len())?;
        let moves = (1..)
            .zip(args)
            .map(|(register, &src)| {
                self.insert_instr_to_current_block(InstructionKind::Move { src, register })
            })
            .collect_vec();
        Ok(self.insert_instr_to_current_block(InstructionKind::Call {
            callee,
            name: name.to_string(),
            args: moves,
        }))
    }

    /// Like `call_current_function`, but the result is also moved to the return register.
    pub fn call_value_function(
        &mut self,
        callee: IdentId,
        name: &str,
        args: &[Operand],
    ) -> Result<InstrId> {
        if self.function_is_void(callee) {
            bail!("`{name}` does not return a value");
        }
        let call = self.call_current_function(callee, name, args)?;
        let register = self.options.return_register;
        self.insert_instr_to_current_block(InstructionKind::Move {
            src: Operand::value(call),
            register,
        });
        Ok(call)
    }

    /// Closes the current function definition and goes back to translating main.
    pub fn restore_global_ir(&mut self) {
        let index = self
            .current
            .take()
            .expect("restore_global_ir called outside a function definition");
        let builder = &mut self.functions[index].builder;
        let ends_in_return = builder
            .cfg()
            .block(builder.current_block())
            .instructions()
            .last()
            .map_or(false, |&last| builder.cfg().instr(last).kind.is_return());
        if ends_in_return {
            builder.propagate_common_subexpr();
        } else {
            builder.finalize(InstructionKind::Unary {
                op: UnaryOp::Return,
                arg: Operand::default(),
            });
        }
    }

    /// Finalizes main and reports every variable that may be read before it is assigned.
    pub fn finish(&mut self) -> BTreeSet<IdentId> {
        assert!(self.current.is_none(), "a function definition is still open");
        self.main.finalize(InstructionKind::End);
        let uninitialized = self
            .functions
            .iter()
            .map(|function| &function.builder)
            .chain([&self.main])
            .flat_map(SsaBuilder::uninitialized_variables)
            .collect::<BTreeSet<_>>();
        for ident in &uninitialized {
            warn!(ident, "variable may be used before it is initialized");
        }
        uninitialized
    }
}

impl Deref for Program {
    type Target = SsaBuilder;

    fn deref(&self) -> &SsaBuilder {
        match self.current {
            Some(index) => &self.functions[index].builder,
            None => &self.main,
        }
    }
}

impl DerefMut for Program {
    fn deref_mut(&mut self) -> &mut SsaBuilder {
        match self.current {
            Some(index) => &mut self.functions[index].builder,
            None => &mut self.main,
        }
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for function in &self.functions {
            match function.ident {
                Some(ident) => {
                    writeln!(f, "function {ident}({})", function.params.iter().join(", "))?
                }
                None => writeln!(f, "function <unnamed>")?,
            }
            writeln!(f, "{}", function.builder)?;
        }
        writeln!(f, "main")?;
        write!(f, "{}", self.main)
    }
}

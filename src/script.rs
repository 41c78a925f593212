use crate::dispatch::DispatchSolution;
use crate::model::{Model, SolveMode, WeightPolicy};
use crate::recorders::{self, SolutionPrinter, SolutionRecorder};
use crate::regression::OpRegression;
use crate::solver::DpSolver;
use crate::HydrodpError;
use std::io::Write;
use tracing::debug;

const COMMAND_HELP: &str = "\
# This help
> help
# Quit program
> end
# Create a custom efficiency curve
> curve <curvename> flo <n floats in ascending order>
> curve <curvename> pow <n floats in ascending order>
> curve <curvename> eff <n floats>
# Create a unit from a reference or custom efficiency curve
> unit <unitname> <curvename> <design head> ft <design flow> cfs <design kw> kw [ capacity <float> ] [ weight <float> ] [ headloss <float> ] [ geneff <float> ] [ gencurve <curvename> ]
# Specify current head for optimization
> head <current head> ft
# Specify discretization of efficiency curve for optimization
> unitsteps <integer>
# Optimize for either power or flow
> solve ( power | flow )
# Print configuration or final solution
> print ( solution | config | units | curves | allcurves | weights | weighting )
# Dispatch a demand level off the solved table
> dispatch for <value>
> dispatch print
# Operating-point regression
> op caps <n floats [0...1]>
> op dep <float> ft
> op regress
> op print
";

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Eol,
}

/// Whitespace-delimited token cursor with '#' comments stripped to end of
/// line. Line boundaries are kept only for `echo`.
struct Tokens {
    tokens: Vec<Token>,
    pos: usize,
}

impl Tokens {
    fn parse(text: &str) -> Self {
        let mut tokens = Vec::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("");
            for word in line.split_whitespace() {
                tokens.push(Token::Word(word.to_string()));
            }
            tokens.push(Token::Eol);
        }
        Self { tokens, pos: 0 }
    }

    fn next_word(&mut self) -> Option<String> {
        while self.pos < self.tokens.len() {
            let token = &self.tokens[self.pos];
            self.pos += 1;
            if let Token::Word(w) = token {
                return Some(w.clone());
            }
        }
        None
    }

    fn peek_word(&self) -> Option<&str> {
        let mut p = self.pos;
        while p < self.tokens.len() {
            if let Token::Word(w) = &self.tokens[p] {
                return Some(w);
            }
            p += 1;
        }
        None
    }

    fn rest_of_line(&mut self) -> String {
        let mut words = Vec::new();
        while self.pos < self.tokens.len() {
            match &self.tokens[self.pos] {
                Token::Word(w) => {
                    words.push(w.clone());
                    self.pos += 1;
                }
                Token::Eol => {
                    self.pos += 1;
                    break;
                }
            }
        }
        words.join(" ")
    }

    /// Scan forward for `label:` (or a bare `label` token).
    fn skip_to_label(&mut self, label: &str) -> Result<(), HydrodpError> {
        while let Some(word) = self.next_word() {
            let bare = word.strip_suffix(':').unwrap_or(&word);
            if bare.eq_ignore_ascii_case(label) {
                return Ok(());
            }
        }
        Err(HydrodpError::LabelNotFound(label.to_string()))
    }

    /// Consume the run of tokens that parse as floats.
    fn read_floats(&mut self) -> Vec<f64> {
        let mut values = Vec::new();
        loop {
            let parsed = self.peek_word().and_then(|w| w.parse::<f64>().ok());
            match parsed {
                Some(v) => {
                    values.push(v);
                    self.next_word();
                }
                None => break,
            }
        }
        values
    }
}

fn require(tokens: &mut Tokens, command: &str) -> Result<String, HydrodpError> {
    tokens
        .next_word()
        .ok_or_else(|| HydrodpError::ScriptMissingParameter(command.to_string()))
}

fn require_f64(tokens: &mut Tokens, command: &str) -> Result<f64, HydrodpError> {
    let word = require(tokens, command)?;
    word.parse().map_err(|_| HydrodpError::ScriptParse(word))
}

fn require_usize(tokens: &mut Tokens, command: &str) -> Result<usize, HydrodpError> {
    let word = require(tokens, command)?;
    word.parse().map_err(|_| HydrodpError::ScriptParse(word))
}

/// The interactive/file command driver. Owns the model, the solver and the
/// post-solve consumers, and interprets the textual command language
/// against them.
pub struct ScriptRunner<W: Write> {
    model: Model,
    solver: DpSolver,
    op: OpRegression,
    dispatch: Option<DispatchSolution>,
    pending_flow: Vec<f64>,
    pending_power: Vec<f64>,
    transpose: bool,
    delimiter: char,
    debug_mode: bool,
    symbols: Vec<String>,
    test_condition: bool,
    ended: bool,
    out: W,
}

impl<W: Write> ScriptRunner<W> {
    pub fn new(out: W) -> Self {
        Self {
            model: Model::default(),
            solver: DpSolver::new(),
            op: OpRegression::new(),
            dispatch: None,
            pending_flow: Vec::new(),
            pending_power: Vec::new(),
            transpose: false,
            delimiter: ' ',
            debug_mode: false,
            symbols: Vec::new(),
            test_condition: false,
            ended: false,
            out,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn solver(&self) -> &DpSolver {
        &self.solver
    }

    pub fn op(&self) -> &OpRegression {
        &self.op
    }

    pub fn dispatch_solution(&self) -> Option<&DispatchSolution> {
        self.dispatch.as_ref()
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn set_transpose(&mut self, transpose: bool) {
        self.transpose = transpose;
    }

    pub fn set_delimiter(&mut self, delimiter: char) {
        self.delimiter = delimiter;
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug_mode = debug;
    }

    pub fn define_symbol(&mut self, symbol: &str) {
        self.symbols.push(symbol.to_string());
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn say(&mut self, line: &str) -> Result<(), HydrodpError> {
        writeln!(self.out, "{}", line).map_err(|e| HydrodpError::Io(e.to_string()))
    }

    /// Interpret a program or a single interactive line. Configuration
    /// errors propagate; infeasibility messages print and recovery
    /// continues, as interactive use expects.
    pub fn run(&mut self, text: &str) -> Result<(), HydrodpError> {
        let mut tokens = Tokens::parse(text);

        while let Some(word) = tokens.next_word() {
            match word.to_ascii_lowercase().as_str() {
                "curve" => self.cmd_curve(&mut tokens)?,
                "unit" => self.cmd_unit(&mut tokens)?,
                "weight" => {
                    let name = require(&mut tokens, "weight")?;
                    let value = require_f64(&mut tokens, "weight")?;
                    let index = self.model.get_turbine_index_by_name(&name)?;
                    self.model.set_turbine_weight(&index, value)?;
                }
                "weighting" => self.cmd_weighting(&mut tokens)?,
                "head" => {
                    let value = require_f64(&mut tokens, "head")?;
                    let unit = require(&mut tokens, "head")?;
                    self.model.set_head(value);
                    self.model.units_mut().parse_token(&unit)?;
                }
                "min" => {
                    let value = require_f64(&mut tokens, "min")?;
                    let unit = require(&mut tokens, "min")?;
                    self.model.set_min_state(value);
                    self.model.units_mut().parse_token(&unit)?;
                }
                "max" => {
                    let value = require_f64(&mut tokens, "max")?;
                    let unit = require(&mut tokens, "max")?;
                    self.model.set_max_state(value);
                    self.model.units_mut().parse_token(&unit)?;
                }
                "losscoef" => {
                    let value = require_f64(&mut tokens, "losscoef")?;
                    self.model.set_loss_coef(value);
                }
                "coordinationfactora" => {
                    let value = require_f64(&mut tokens, "coordinationfactora")?;
                    self.model.set_coordination_a(value);
                }
                "coordinationfactorb" => {
                    let value = require_f64(&mut tokens, "coordinationfactorb")?;
                    self.model.set_coordination_b(value);
                }
                "unitsteps" => {
                    let value = require_usize(&mut tokens, "unitsteps")?;
                    self.model.set_user_steps(value);
                }
                "solve" => self.cmd_solve(&mut tokens)?,
                "dispatch" => self.cmd_dispatch(&mut tokens)?,
                "op" => self.cmd_op(&mut tokens)?,
                "print" => self.cmd_print(&mut tokens)?,
                "transpose" => {
                    self.transpose = require_usize(&mut tokens, "transpose")? != 0;
                }
                "delimiter" => {
                    self.delimiter = tokens.next_word().and_then(|w| w.chars().next()).unwrap_or(' ');
                }
                "debug" => {
                    self.debug_mode = require_usize(&mut tokens, "debug")? != 0;
                }
                "echo" => {
                    let line = tokens.rest_of_line();
                    self.say(&line)?;
                }
                "define" => {
                    let symbol = require(&mut tokens, "define")?;
                    self.symbols.push(symbol);
                }
                "test" => {
                    let symbol = require(&mut tokens, "test")?;
                    self.test_condition = self.symbols.iter().any(|s| s.eq_ignore_ascii_case(&symbol));
                }
                "skipto" => {
                    let label = require(&mut tokens, "skipto")?;
                    tokens.skip_to_label(&label)?;
                }
                "skiptoif" => {
                    let label = require(&mut tokens, "skiptoif")?;
                    if self.test_condition {
                        tokens.skip_to_label(&label)?;
                    }
                }
                "help" => self.say(COMMAND_HELP)?,
                "end" => {
                    self.ended = true;
                    break;
                }
                other => {
                    if other.ends_with(':') {
                        debug!("skipping label {}", other);
                    } else {
                        return Err(HydrodpError::ScriptParse(word));
                    }
                }
            }
        }
        Ok(())
    }

    fn cmd_curve(&mut self, tokens: &mut Tokens) -> Result<(), HydrodpError> {
        let name = require(tokens, "curve")?;
        let axis = require(tokens, "curve")?;
        let values = tokens.read_floats();
        match axis.to_ascii_lowercase().as_str() {
            "flo" => self.pending_flow = values,
            "pow" => self.pending_power = values,
            "eff" => {
                // the eff row completes the curve definition
                let flow = std::mem::take(&mut self.pending_flow);
                let power = std::mem::take(&mut self.pending_power);
                self.model.register_curve(&name, flow, power, values)?;
            }
            _ => return Err(HydrodpError::ScriptParse(axis)),
        }
        Ok(())
    }

    fn cmd_unit(&mut self, tokens: &mut Tokens) -> Result<(), HydrodpError> {
        let name = require(tokens, "unit")?;
        let curve_name = require(tokens, "unit")?;
        let rated_head = require_f64(tokens, "unit")?;
        let unit = require(tokens, "unit")?;
        self.model.units_mut().parse_token(&unit)?;
        let max_flow = require_f64(tokens, "unit")?;
        let unit = require(tokens, "unit")?;
        self.model.units_mut().parse_token(&unit)?;
        let max_power = require_f64(tokens, "unit")?;
        let unit = require(tokens, "unit")?;
        self.model.units_mut().parse_token(&unit)?;

        let curve = self.model.get_curve_index_by_name(&curve_name)?;
        let index = self.model.register_turbine(&name, curve, rated_head, max_flow, max_power)?;

        loop {
            let keyword = match tokens.peek_word() {
                Some(w) => w.to_ascii_lowercase(),
                None => break,
            };
            match keyword.as_str() {
                "capacity" | "weight" | "headloss" | "geneff" | "gencurve" => {
                    tokens.next_word();
                    let value = require(tokens, &keyword)?;
                    match keyword.as_str() {
                        "capacity" => {
                            let v = value.parse().map_err(|_| HydrodpError::ScriptParse(value))?;
                            self.model.set_turbine_gencap(&index, v)?;
                        }
                        "weight" => {
                            let v = value.parse().map_err(|_| HydrodpError::ScriptParse(value))?;
                            self.model.set_turbine_weight(&index, v)?;
                        }
                        "headloss" => {
                            let v = value.parse().map_err(|_| HydrodpError::ScriptParse(value))?;
                            self.model.set_turbine_headloss(&index, v)?;
                        }
                        "geneff" => {
                            let v = value.parse().map_err(|_| HydrodpError::ScriptParse(value))?;
                            self.model.set_turbine_geneff(&index, v)?;
                        }
                        "gencurve" => {
                            let gen_curve = self.model.get_curve_index_by_name(&value)?;
                            self.model.set_turbine_gencurve(&index, gen_curve)?;
                        }
                        _ => unreachable!(),
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn cmd_weighting(&mut self, tokens: &mut Tokens) -> Result<(), HydrodpError> {
        let mut token = require(tokens, "weighting")?;
        let mut relative = false;
        if token.eq_ignore_ascii_case("relative") {
            relative = true;
            token = require(tokens, "weighting")?;
        }
        let policy = match token.to_ascii_lowercase().as_str() {
            "default" => WeightPolicy::Default,
            "equal" => WeightPolicy::Equal,
            "maxpower" => WeightPolicy::MaxPower,
            "maxflow" => WeightPolicy::MaxFlow,
            "minpower" => WeightPolicy::MinPower,
            "minflow" => WeightPolicy::MinFlow,
            _ => return Err(HydrodpError::ScriptParse(token)),
        };
        self.model.set_weight_policy(policy, relative);
        Ok(())
    }

    fn cmd_solve(&mut self, tokens: &mut Tokens) -> Result<(), HydrodpError> {
        let mode_token = require(tokens, "solve")?;
        let mode = match mode_token.to_ascii_lowercase().as_str() {
            "power" => SolveMode::ForPower,
            "flow" => SolveMode::ForFlow,
            _ => return Err(HydrodpError::ScriptParse(mode_token)),
        };
        self.model.set_solve_mode(mode);
        self.model.assign_weights();
        self.model.reset_state_span();

        if let Err(e) = self.solver.resize(&self.model) {
            return self.report_infeasible(e);
        }
        self.say("DP starting...")?;
        if let Err(e) = self.solver.allocate() {
            return self.report_infeasible(e);
        }
        if let Err(e) = self.solver.solve(&self.model) {
            return self.report_infeasible(e);
        }
        Ok(())
    }

    /// Infeasible problems report and recover; configuration errors
    /// propagate to the caller.
    fn report_infeasible(&mut self, error: HydrodpError) -> Result<(), HydrodpError> {
        match error {
            HydrodpError::ZeroHead
            | HydrodpError::FlatObjective
            | HydrodpError::ZeroProblem
            | HydrodpError::TooFewSteps => {
                let message = error.to_string();
                self.say(&message)
            }
            other => Err(other),
        }
    }

    fn cmd_dispatch(&mut self, tokens: &mut Tokens) -> Result<(), HydrodpError> {
        let sub = require(tokens, "dispatch")?;
        match sub.to_ascii_lowercase().as_str() {
            "for" => {
                let demand = require_f64(tokens, "dispatch for")?;
                match DispatchSolution::from_solution(&self.solver, demand) {
                    Ok(d) => self.dispatch = Some(d),
                    Err(
                        e @ (HydrodpError::NoStages
                        | HydrodpError::NoSolution
                        | HydrodpError::NegativeDispatch
                        | HydrodpError::DispatchNotBracketed),
                    ) => {
                        self.dispatch = None;
                        let message = e.to_string();
                        self.say(&message)?;
                    }
                    Err(e) => return Err(e),
                }
            }
            "print" => {
                let dispatch = self.dispatch.clone();
                match (dispatch, self.solver.mode()) {
                    (Some(dispatch), Some(mode)) => {
                        recorders::print_dispatch(&mut self.out, mode, &dispatch, self.delimiter, self.transpose)
                            .map_err(|e| HydrodpError::Io(e.to_string()))?;
                    }
                    _ => self.say("unit dispatch: no solution available")?,
                }
            }
            _ => return Err(HydrodpError::ScriptParse(sub)),
        }
        Ok(())
    }

    fn cmd_op(&mut self, tokens: &mut Tokens) -> Result<(), HydrodpError> {
        let sub = require(tokens, "op")?;
        match sub.to_ascii_lowercase().as_str() {
            "caps" => {
                let capacities = tokens.read_floats();
                self.op.set_capacities(&capacities);
            }
            "dep" => {
                let value = require_f64(tokens, "op dep")?;
                let unit = require(tokens, "op dep")?;
                self.model.units_mut().parse_token(&unit)?;
                self.op.set_dependent(value);
            }
            "regress" => match self.op.regress(&self.model, &self.solver) {
                Ok(()) => {}
                Err(e @ (HydrodpError::NoOperatingPoints | HydrodpError::NoSolution)) => {
                    let message = e.to_string();
                    self.say(&message)?;
                }
                Err(e) => return Err(e),
            },
            "print" => {
                recorders::print_op(&mut self.out, &self.op, self.delimiter)
                    .map_err(|e| HydrodpError::Io(e.to_string()))?;
            }
            _ => return Err(HydrodpError::ScriptParse(sub)),
        }
        Ok(())
    }

    fn cmd_print(&mut self, tokens: &mut Tokens) -> Result<(), HydrodpError> {
        let sub = require(tokens, "print")?;
        let io = |e: std::io::Error| HydrodpError::Io(e.to_string());
        match sub.to_ascii_lowercase().as_str() {
            "units" => recorders::print_units(&mut self.out, &self.model).map_err(io)?,
            "curves" => recorders::print_curves(&mut self.out, &self.model, true).map_err(io)?,
            "allcurves" => recorders::print_curves(&mut self.out, &self.model, false).map_err(io)?,
            "weights" => {
                self.model.assign_weights();
                recorders::print_weights(&mut self.out, &self.model).map_err(io)?;
            }
            "weighting" => recorders::print_weighting(&mut self.out, &self.model).map_err(io)?,
            "config" => recorders::print_config(&mut self.out, &self.model).map_err(io)?,
            "solution" => {
                if self.solver.mode().is_none() {
                    return Err(HydrodpError::SolveModeUnspecified);
                }
                let mut printer = SolutionPrinter::new(&mut self.out);
                printer.delimiter = self.delimiter;
                printer.transpose = self.transpose;
                printer.debug = self.debug_mode;
                printer.save(&self.model, &self.solver)?;
            }
            _ => return Err(HydrodpError::ScriptParse(sub)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
curve c1 flo 0 .175 .22 .25 .285 .325 .375 .435 .485 .525 .60 .68 .75 .82 .91 1.00 1.08
curve c1 pow 0 .175 .22 .25 .285 .325 .375 .435 .485 .525 .60 .68 .75 .82 .91 1.00 1.08
curve c1 eff 0 .65 .70 .725 .75 .775 .80 .825 .84 .85 .86 .865 .8675 .8675 .865 .858 .85
# comment
unit u2 Crossflow 68 ft 1400 cfs 1700 kw
unit u3 Francis   63 ft  730 cfs 1500 kw
unit u4 Kaplan    65 ft 1000 cfs 1500 kw
unit u1 Kaplan    65 ft 1250 cfs 1250 kw
# comment
head 65 ft min 0 cfs max 0 cfs unitsteps 5
solve power
print units
print solution
";

    const SAMPLE2: &str = "\
unit u1 Pelton 65 ft 1000 cfs 1500 kw
unit u2 Pelton 65 ft 1000 cfs 1500 kw
unit u3 Pelton 65 ft 1000 cfs 1500 kw
# comment
head 65 ft min 0 cfs max 0 cfs unitsteps 5
solve flow
print units
print solution
";

    #[test]
    fn test_sample_program() {
        let mut runner = ScriptRunner::new(Vec::new());
        runner.run(SAMPLE).unwrap();

        assert_eq!(runner.model().turbines().len(), 4);
        assert!(runner.model().get_curve_index_by_name("c1").is_ok());
        assert!(!runner.solver().did_fail());
        assert!(runner.solver().primary_totals().iter().any(|&v| v > 0.0));

        let text = String::from_utf8(runner.into_inner()).unwrap();
        assert!(text.contains("DP starting..."));
        assert!(text.contains("unit u2 CrossFlow"));
        assert!(text.contains("KW/CFS"));
    }

    #[test]
    fn test_sample_program_flow_mode() {
        let mut runner = ScriptRunner::new(Vec::new());
        runner.run(SAMPLE2).unwrap();

        assert!(!runner.solver().did_fail());
        let states = runner.solver().states();
        let total = runner.solver().primary_totals()[states - 1];
        assert!((total - 3000.0).abs() / 3000.0 < 0.05);
    }

    #[test]
    fn test_unit_options_and_weight_command() {
        let script = "\
unit u1 Kaplan 65 ft 1000 cfs 1500 kw capacity 1.1 weight 0.5 headloss 2.0 geneff 0.9
weight u1 0.75
";
        let mut runner = ScriptRunner::new(Vec::new());
        runner.run(script).unwrap();

        let index = runner.model().get_turbine_index_by_name("u1").unwrap();
        let turbine = runner.model().get_turbine(&index).unwrap();
        assert_eq!(turbine.gen_capacity(), 1.1);
        assert_eq!(turbine.headloss_coef(), 2.0);
        assert_eq!(turbine.weight(), 0.75);
    }

    #[test]
    fn test_branching_and_echo() {
        let script = "\
define fast
test fast
skiptoif done
echo should not appear
done:
echo made it
";
        let mut runner = ScriptRunner::new(Vec::new());
        runner.run(script).unwrap();
        let text = String::from_utf8(runner.into_inner()).unwrap();
        assert!(!text.contains("should not appear"));
        assert!(text.contains("made it"));
    }

    #[test]
    fn test_skipto_unconditional() {
        let script = "\
skipto target
echo skipped
target:
echo after
end
echo never
";
        let mut runner = ScriptRunner::new(Vec::new());
        runner.run(script).unwrap();
        assert!(runner.has_ended());
        let text = String::from_utf8(runner.into_inner()).unwrap();
        assert!(!text.contains("skipped"));
        assert!(text.contains("after"));
        assert!(!text.contains("never"));
    }

    #[test]
    fn test_parse_errors() {
        let mut runner = ScriptRunner::new(Vec::new());
        assert_eq!(
            runner.run("frobnicate 1"),
            Err(HydrodpError::ScriptParse("frobnicate".to_string()))
        );

        let mut runner = ScriptRunner::new(Vec::new());
        assert_eq!(
            runner.run("unit u1 NoSuchCurve 65 ft 1000 cfs 1500 kw"),
            Err(HydrodpError::CurveNotFound("NoSuchCurve".to_string()))
        );
    }

    #[test]
    fn test_zero_head_recovers() {
        let script = "\
unit u1 Kaplan 65 ft 1000 cfs 1500 kw
head 0 ft
unitsteps 5
solve power
echo still here
";
        let mut runner = ScriptRunner::new(Vec::new());
        runner.run(script).unwrap();
        assert!(runner.solver().did_fail());
        let text = String::from_utf8(runner.into_inner()).unwrap();
        assert!(text.contains("infeasible problem: zero head"));
        assert!(text.contains("still here"));
    }

    #[test]
    fn test_dispatch_and_op_commands() {
        let mut runner = ScriptRunner::new(Vec::new());
        runner.run(SAMPLE2).unwrap();

        let states = runner.solver().states();
        let demand = runner.solver().primary_totals()[states - 1] * 0.5;
        runner.run(&format!("dispatch for {}\ndispatch print\n", demand)).unwrap();
        assert!(runner.dispatch_solution().is_some());

        runner
            .run("op caps 0.25 0.5 0.75 1.0\nop dep 65 ft\nop regress\nop print\n")
            .unwrap();
        assert_eq!(runner.op().capacities().len(), 4);
        // first regression is the degenerate flat fit
        assert!(runner.op().slope().iter().all(|&m| m == 0.0));
    }
}

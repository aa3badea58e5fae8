//! 各阶段的 Prompt 模板
//!
//! 模板中的 `{name}` 占位符由 [`render`] 填充。每个模板以固定的角色定义开头，
//! MockLlmClient 据此识别当前阶段。

/// 需求重写（Goal Refiner）角色
pub const GOAL_ROLE: &str = "你是一个专业的需求重写专家";
/// 任务规划（Planner）角色
pub const PLAN_ROLE: &str = "你是一个专业的任务规划专家";
/// 子任务执行（Dispatcher）角色
pub const SOLVE_ROLE: &str = "你是一个工具参数识别和精准调用专家";
/// 工具结果总结（Dispatcher 收尾）角色
pub const SUMMARIZE_ROLE: &str = "你是一个子任务结果总结专家";
/// 计划更新（Replanner）角色
pub const REPLAN_ROLE: &str = "你是一个专业任务结果总结助手";
/// 报告产出（Reporter）角色
pub const REPORT_ROLE: &str = "你是一个专业的任务报告产出助手";

/// 工具绑定说明的起始标记
pub const TOOL_BINDING_MARKER: &str = "【可用工具】";

pub const GOAL_PROMPT: &str = "角色定义：
你是一个专业的需求重写专家，负责将用户提出的模糊需求转化为明确、可执行的目标描述。

用户输入如下:
{task}

核心职责是确保目标描述具备以下特性：
    逻辑性 - 保持严谨的表述结构
    简明性 - 采用精炼的专业化表达，一到两句话表达
    完整性 - 涵盖所有必要要素
    清晰性 - 使用准确易懂的表达

注意：只输出目标描述本身，不需要其他额外内容

示例输入：帮我写一份python报告
示例输出：撰写一份结构清晰、内容完整的 Python 报告，包含 Python 技术应用案例、代码示例及结果分析，以专业化表达呈现。";

pub const PLAN_PROMPT: &str = "角色定义：
你是一个专业的任务规划专家，根据目标描述和当前可用工具将目标分解为可执行的子任务流程，确保每个子任务清晰、具体且可独立执行。

目标描述如下：
{goal}

当前可用工具如下：
{tools}

处理逻辑：
    1. 任务分解：将目标拆解为逻辑连贯、详细完整的子任务，每个子任务必须足够具体，可直接交由 LLM 执行
    2. 工具匹配：需要调用工具的子任务 mode 填 tool 并给出 tool 名称；无需工具的子任务 mode 填 direct
       严格验证工具可用性，不得虚构未提供的工具
    3. 计划验证：覆盖全部需求；顺序合理，后面的子任务不能依赖尚未产生的结果
    4. 数量要求：子任务数量为 1 到 {max_steps} 个";

pub const PLAN_INSTRUCTION: &str = "请为上述目标制定执行计划。";

pub const SOLVE_PROMPT: &str = "角色定义：
你是一个工具参数识别和精准调用专家。需要执行【当前子任务】。

注意：
执行要以【用户目标】为导向，只需要执行当前子任务。
根据需求选择合适准确的工具调用，否则直接回复生成的内容。
子任务的标注只是参考，你可以自主选择直接生成还是调用工具。

用户目标如下：
{goal}
当前子任务如下：
<current_step>
{current_step}
</current_step>
历史任务执行记录如下：
{ledger}";

pub const SOLVE_INSTRUCTION: &str = "请执行当前子任务。";

/// 绑定工具时追加在 Dispatcher prompt 之后
pub const TOOL_BINDING: &str = "【可用工具】
{tools}

若要调用工具，只输出一个 JSON 对象，不要输出其它内容：
{\"tool_calls\": [{\"name\": \"工具名称\", \"arguments\": {参数}}]}
每次只调用一个工具；若无需工具，直接输出子任务的执行结果。";

pub const SUMMARIZE_PROMPT: &str = "角色定义：
你是一个子任务结果总结专家。当前子任务已有工具执行结果，不需要再调用工具，直接对结果进行加工总结。

用户目标如下：
{goal}
当前子任务如下：
<current_step>
{current_step}
</current_step>
工具执行结果如下：
{tool_result}";

pub const SUMMARIZE_INSTRUCTION: &str = "请根据工具执行结果完成当前子任务。";

pub const REPLAN_PROMPT: &str = "角色定义：
你是一个专业任务结果总结助手。请根据历史工具或 AI 执行的结果总结每个步骤的结果，要求：
每个步骤的执行结果必须经过加工总结，可能是参考工具执行结果针对步骤进行总结，也可能是对 AI 直接生成的结果进行总结概括。

当前任务: {task}
当前计划: {plan}
当前步骤:
<steps>
{steps}
</steps>
执行结果:
{ledger}
已完成的步骤: step1 到 step{completed}

注意：
1. 你只能根据执行记录更新步骤结果，不能自己执行步骤
2. 没有执行记录的步骤，result 严格写'未执行'
3. 已完成的步骤必须原样保留（顺序与描述不变）
4. 你可以优化尚未执行的步骤（调整描述或工具、合并拆分），但步骤总数为 1 到 {max_steps} 个";

pub const REPLAN_INSTRUCTION: &str =
    "请根据历史消息更新计划结果，如果某个计划步骤未执行则写'未执行'。";

pub const REPORT_PROMPT: &str = "角色定义：
你是一个专业的任务报告产出助手。请你以【用户目标】为导向，参考【历史子任务执行记录】，完成报告的总结部分。

用户目标: {goal}
计划: {plan}
步骤:
{steps}
历史子任务执行记录:
{summaries}

要求:
1. 依据步骤执行结果进行总结，与用户目标直接相关
2. 使用 Markdown 格式，不要重复输出标题，直接输出总结正文";

pub const REPORT_INSTRUCTION: &str = "请完成报告的总结部分。";

/// 用 vars 填充模板中的 `{name}` 占位符；未提供的占位符保持原样
///
/// 只扫描模板本身一遍，填入的值不会再被替换。
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v, close))
        });
        match value {
            Some((v, close)) => {
                out.push_str(v);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// 取出 `<tag>...</tag>` 之间的内容
pub fn extract_block<'a>(prompt: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = prompt.find(&open)? + open.len();
    let end = prompt[start..].find(&close)? + start;
    Some(prompt[start..end].trim())
}

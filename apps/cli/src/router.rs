//! 输入行路由
//!
//! 行协议：`<axis>:<request>`，冒号之前是轴名，之后原样交给轴解析。
//! 另外支持两个查询/设置扩展：
//!
//! ```text
//! alt:slew 90          运动请求
//! alt:angle            读取当前角度
//! alt:set ACC 0x08A    写寄存器（十进制或 0x 十六进制）
//! exit                 退出（同 quit）
//! ```

use anyhow::{Context, Result, bail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Empty,
    Quit,
    /// 轴名列表及状态
    List,
    Request { axis: String, text: String },
    Angle { axis: String },
    SetParam { axis: String, name: String, value: i64 },
}

fn parse_value(text: &str) -> Result<i64> {
    let text = text.trim();
    let (digits, negative) = match text.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (text, false),
    };
    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    }
    .with_context(|| format!("invalid value {:?}", text))?;
    Ok(if negative { -value } else { value })
}

pub fn parse_line(input: &str) -> Result<Line> {
    let line = input.trim();
    match line {
        "" => return Ok(Line::Empty),
        "exit" | "quit" => return Ok(Line::Quit),
        "list" => return Ok(Line::List),
        _ => {},
    }

    let Some((axis, rest)) = line.split_once(':') else {
        bail!("expected <axis>:<request>, got {:?}", line);
    };
    let axis = axis.trim().to_string();
    if axis.is_empty() {
        bail!("missing axis name in {:?}", line);
    }
    let rest = rest.trim();

    if rest == "angle" {
        return Ok(Line::Angle { axis });
    }
    if let Some(args) = rest.strip_prefix("set ") {
        let mut parts = args.split_whitespace();
        let (Some(name), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            bail!("usage: <axis>:set <REGISTER> <value>");
        };
        return Ok(Line::SetParam {
            axis,
            name: name.to_string(),
            value: parse_value(value)?,
        });
    }

    Ok(Line::Request {
        axis,
        text: rest.to_string(),
    })
}

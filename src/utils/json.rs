//! 数据集行格式的 JSON 序列化
//!
//! 数据集文件中的每一行使用 `", "` 与 `": "` 作为分隔符，
//! 非 ASCII 字符输出为 `\uXXXX` 转义，与已有数据集保持一致的行格式。

use std::io;

use serde::ser::Error as _;
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::Value;

/// 带空格分隔符、ASCII 输出的紧凑格式（单行输出）
#[derive(Debug, Clone, Copy, Default)]
pub struct DatasetFormatter;

impl Formatter for DatasetFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    // 引号、反斜杠与控制字符已由 serde_json 转义，这里只处理剩余字符
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (index, ch) in fragment.char_indices() {
            if is_plain_ascii(ch) {
                continue;
            }
            writer.write_all(fragment[start..index].as_bytes())?;
            let mut units = [0u16; 2];
            // 非 BMP 字符写为代理对
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = index + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// 可原样写出的字符（可打印 ASCII）
fn is_plain_ascii(ch: char) -> bool {
    ch.is_ascii() && ch != '\x7f'
}

/// 序列化为单行数据集格式字符串
pub fn to_dataset_string<T>(value: &T) -> serde_json::Result<String>
where
    T: ?Sized + Serialize,
{
    let mut buf = Vec::with_capacity(128);
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, DatasetFormatter);
    value.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(serde_json::Error::custom)
}

/// 判断值是否为"真值"
///
/// null / false / 0 / 空字符串 / 空数组 / 空对象 视为假值
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

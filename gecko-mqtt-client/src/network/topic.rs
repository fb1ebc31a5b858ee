/// 订阅的 filter 是否合法
pub fn valid_subscribe_filter(filter: &str) -> bool {
    // 不可以订阅空 filter
    if filter.is_empty() || filter.len() > u16::MAX as usize {
        return false;
    }

    let levels = filter.split('/').collect::<Vec<&str>>();
    if let Some((last, remaining)) = levels.split_last() {
        for level in remaining.iter() {
            // # 字符只能在最后一层
            if level.contains('#') {
                return false;
            }
            // + 字符必须独占一层
            if level.len() != 1 && level.contains('+') {
                return false;
            }
        }

        // 最后一层的 # 或 + 字符也必须独占一层
        if last.len() != 1 && (last.contains('#') || last.contains('+')) {
            return false;
        }
    }

    true
}
